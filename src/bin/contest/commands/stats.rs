//! Stats command - participation summary for one competition

use crate::client::ContestClient;
use crate::style::*;
use anyhow::Result;
use uuid::Uuid;

pub async fn run(server: &str, id: Uuid) -> Result<()> {
    let client = ContestClient::new(server);
    let competition = client.competition(id).await?;
    let stats = client.stats(id).await?;

    print_header(&competition.name);
    println!("Status:            {}", style_status(competition.status.as_str()));
    println!("Participants:      {}", style_bold(&stats.total_participants.to_string()));
    println!("  active:          {}", stats.active_participants);
    println!("  completed:       {}", stats.completed_participants);
    println!(
        "Average progress:  {} {:.1}%",
        progress_bar(stats.average_progress, 20),
        stats.average_progress
    );

    if stats.top_performers.is_empty() {
        println!();
        print_info("No scored participants yet.");
        return Ok(());
    }

    println!();
    println!("{:>4}  {:<24}  {:>8}  {:>8}", "Rank", "User", "Score", "Progress");
    println!("{}", "─".repeat(52));
    for (i, p) in stats.top_performers.iter().enumerate() {
        let rank = format!("#{}", i + 1);
        let rank_styled = if i == 0 {
            style_yellow(&rank)
        } else if i < 3 {
            style_cyan(&rank)
        } else {
            rank
        };
        println!(
            "{:>4}  {:<24}  {:>8.1}  {:>7.1}%",
            rank_styled,
            truncate(&p.user_id, 24),
            p.total_score,
            p.completion_percentage
        );
    }

    Ok(())
}
