//! Example loading policy overrides from JSON and running the sweeper.
//!
//! Run with: `cargo run --example custom_policies --features async`

use brokerz_throttle::{should_bypass_rate_limit, PolicyName, PolicyTable, RateLimitGate};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const OVERRIDES: &str = r#"{
    "ai_call": { "capacity": 3, "window_secs": 10, "cooldown_secs": 2 }
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("brokerz_throttle=debug"))
        .init();

    println!("=== Custom Policies Example ===\n");

    let table = PolicyTable::from_json_str(OVERRIDES)?;
    for (name, policy) in table.iter() {
        println!(
            "  {:<14} {:>3} per {:>5}s, cooldown {:>4}s",
            name,
            policy.capacity(),
            policy.window().as_secs(),
            policy.cooldown().as_secs()
        );
    }

    let gate = RateLimitGate::builder().with_policy_table(table).build()?;

    #[cfg(feature = "async")]
    let sweeper = brokerz_throttle::spawn_sweeper(gate.clone(), Duration::from_secs(1))?;

    println!("\nFree user calling the assistant:");
    for call in 1..=5 {
        let result = gate.check_rate_limit(PolicyName::AiCall, "user-42", "usar o assistente");
        match result.error() {
            None => println!("  call {}: answered", call),
            Some(message) => println!("  call {}: {}", call, message),
        }
    }

    println!("\nWaiting out the cooldown...");
    tokio::time::sleep(Duration::from_secs(2)).await;
    let result = gate.check_rate_limit(PolicyName::AiCall, "user-42", "usar o assistente");
    println!("  after cooldown: allowed = {}", result.is_allowed());

    // Premium users would skip the gate entirely once this is wired in
    println!(
        "\nBypass for premium user: {}",
        should_bypass_rate_limit("user-7", true)
    );

    #[cfg(feature = "async")]
    sweeper.shutdown().await?;

    println!("\n=== Example Complete ===");
    Ok(())
}
