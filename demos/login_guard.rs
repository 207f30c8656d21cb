//! Example guarding a login handler with the production `login` policy.
//!
//! Run with: `RUST_LOG=brokerz_throttle=debug cargo run --example login_guard`

use brokerz_throttle::{PolicyName, RateLimitGate, RateLimitResult};
use tracing_subscriber::EnvFilter;

/// Stand-in for the real credential check
fn authenticate(email: &str, password: &str) -> bool {
    email == "corretor@izibrokerz.com" && password == "correct horse"
}

fn login(gate: &RateLimitGate, email: &str, password: &str) -> Result<(), String> {
    if let RateLimitResult::Denied { message, .. } =
        gate.check_rate_limit(PolicyName::Login, email, "login")
    {
        return Err(message);
    }

    if authenticate(email, password) {
        Ok(())
    } else {
        Err("Email ou senha inválidos.".to_string())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let gate = RateLimitGate::new();
    let policy = gate.policies().get(PolicyName::Login);

    println!("=== Login Guard Example ===\n");
    println!(
        "Policy: {} attempts per {}s, then a {}s lockout\n",
        policy.capacity(),
        policy.window().as_secs(),
        policy.cooldown().as_secs()
    );

    println!("Brute-forcing one account:");
    for attempt in 1..=12 {
        match login(&gate, "corretor@izibrokerz.com", "hunter2") {
            Ok(()) => println!("  attempt {:>2}: signed in", attempt),
            Err(reason) => println!("  attempt {:>2}: {}", attempt, reason),
        }
    }

    println!("\nEven the right password is refused while locked out:");
    match login(&gate, "corretor@izibrokerz.com", "correct horse") {
        Ok(()) => println!("  signed in"),
        Err(reason) => println!("  {}", reason),
    }

    println!("\nOther accounts are unaffected:");
    match login(&gate, "outro@izibrokerz.com", "hunter2") {
        Ok(()) => println!("  signed in"),
        Err(reason) => println!("  {}", reason),
    }

    let snapshot = gate.metrics().snapshot();
    println!(
        "\nAllowed: {}, denied: {}, denial rate: {:.0}%",
        snapshot.calls_allowed,
        snapshot.calls_denied,
        snapshot.denial_rate() * 100.0
    );
}
