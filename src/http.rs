use reqwest::Client;
use std::time::Duration;

/// Shared client for gateway traffic. `GATEWAY_TIMEOUT_SECS` is the single
/// ceiling applied to every upstream call.
pub fn build_client() -> Client {
    let timeout = env_secs("GATEWAY_TIMEOUT_SECS", 60);
    let connect = env_secs("GATEWAY_CONNECT_TIMEOUT_SECS", 5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
