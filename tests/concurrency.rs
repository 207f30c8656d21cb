use brokerz_throttle::infrastructure::mocks::MockClock;
use brokerz_throttle::{Policy, PolicyName, PolicyTable, RateLimitGate};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn gate(policy: Policy) -> RateLimitGate {
    RateLimitGate::builder()
        .with_policy_table(PolicyTable::uniform(policy))
        .with_clock(Arc::new(MockClock::new(Instant::now())))
        .build()
        .unwrap()
}

#[test]
fn test_shared_key_never_exceeds_capacity() {
    let gate = gate(Policy::from_secs(20, 60, 30).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gate = gate.clone();
            thread::spawn(move || {
                (0..50)
                    .filter(|_| {
                        gate.check_rate_limit(PolicyName::AiCall, "shared", "usar o assistente")
                            .is_allowed()
                    })
                    .count()
            })
        })
        .collect();

    let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(allowed, 20);

    let snapshot = gate.metrics().snapshot();
    assert_eq!(snapshot.calls_allowed, 20);
    assert_eq!(snapshot.calls_denied, 380);
}

#[test]
fn test_distinct_keys_each_get_full_capacity() {
    let gate = gate(Policy::from_secs(5, 60, 30).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let gate = gate.clone();
            thread::spawn(move || {
                let identity = format!("user-{}@example.com", t);
                (0..10)
                    .filter(|_| gate.check_rate_limit(PolicyName::Login, &identity, "login").is_allowed())
                    .count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 5);
    }
    assert_eq!(gate.bucket_count(), Some(8));
}
