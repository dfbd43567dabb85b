//! Health command - server and platform integration status

use crate::client::ContestClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(server: &str) -> Result<()> {
    print_header("Contest Server Health");

    let client = ContestClient::new(server);
    let health = client.health().await?;

    if health.healthy {
        print_success(&format!("Server is up (v{})", health.version));
    } else {
        print_warning(&format!("Server is up but unhealthy (v{})", health.version));
    }
    println!("Uptime:        {}s", health.uptime_secs);
    println!(
        "Integrations:  {}",
        style_status(&health.integrations.status)
    );

    if health.integrations.platforms.is_empty() {
        println!();
        print_info("No platform integrations configured.");
        return Ok(());
    }

    println!();
    println!(
        "{:<15}  {:<10}  {:>16}  Message",
        "Platform", "Status", "Rate limit"
    );
    println!("{}", "─".repeat(60));
    for p in &health.integrations.platforms {
        let status = format!("{:?}", p.status).to_lowercase();
        println!(
            "{:<15}  {:<19}  {:>16}  {}",
            p.platform,
            style_status(&status),
            format!("{}/{}", p.rate_limit.remaining, p.rate_limit.limit),
            style_dim(p.message.as_deref().unwrap_or(""))
        );
    }

    Ok(())
}
