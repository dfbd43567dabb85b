//! Competitions command - list competitions

use crate::client::ContestClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(server: &str, status: Option<&str>) -> Result<()> {
    print_header("Competitions");

    let client = ContestClient::new(server);
    let competitions = client.competitions(status).await?;

    if competitions.is_empty() {
        print_info("No competitions found.");
        return Ok(());
    }

    println!();
    println!(
        "{:<36}  {:<28}  {:<10}  {:>12}  Window",
        "ID", "Name", "Status", "Participants"
    );
    println!("{}", "─".repeat(110));

    for c in &competitions {
        let seats = match c.max_participants {
            Some(max) => format!("{}/{}", c.participant_count, max),
            None => c.participant_count.to_string(),
        };
        println!(
            "{:<36}  {:<28}  {:<19}  {:>12}  {}",
            style_dim(&c.id.to_string()),
            truncate(&c.name, 28),
            style_status(c.status.as_str()),
            seats,
            style_dim(&format!(
                "{} → {}",
                c.start_date.format("%Y-%m-%d"),
                c.end_date.format("%Y-%m-%d")
            ))
        );
    }

    println!();
    println!("Total: {}", competitions.len());
    Ok(())
}
