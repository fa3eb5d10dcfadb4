use std::net::Ipv4Addr;
use std::time::Duration;

const IP_ENDPOINT: &str = "https://httpbin.org/ip";

/// Public IPv4 address of this machine as seen by an echo service
///
/// Returns `None` when the service cannot be reached; callers fall back to
/// an open SSH rule.
pub async fn detect_public_ip() -> Option<Ipv4Addr> {
    match fetch_public_ip().await {
        Ok(addr) => {
            tracing::debug!("Detected public IP {}", addr);
            Some(addr)
        }
        Err(e) => {
            tracing::warn!("Public IP detection failed: {}", e);
            None
        }
    }
}

async fn fetch_public_ip() -> anyhow::Result<Ipv4Addr> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let response = client
        .get(IP_ENDPOINT)
        .header("User-Agent", "bastionflow")
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("{} answered {}", IP_ENDPOINT, response.status());
    }

    let body: serde_json::Value = response.json().await?;
    parse_origin(&body).ok_or_else(|| anyhow::anyhow!("unexpected response: {}", body))
}

/// `{"origin": "203.0.113.7"}`; proxies may append more addresses
fn parse_origin(body: &serde_json::Value) -> Option<Ipv4Addr> {
    body["origin"].as_str()?.split(',').next()?.trim().parse().ok()
}
