//! Hacktoberfest commands - personal status and leaderboard

use crate::client::{ContestClient, PullRequestLine};
use crate::style::*;
use anyhow::Result;

pub async fn status(server: &str, username: &str) -> Result<()> {
    let client = ContestClient::new(server);
    let status = client.hacktoberfest_status(username).await?;

    print_header(&format!("Hacktoberfest {} - @{}", status.year, status.username));

    let progress = &status.progress;
    println!(
        "Progress:     {} {}/{} PRs",
        progress_bar(progress.percentage, 20),
        progress.valid_prs,
        progress.required_prs
    );
    println!("Total score:  {}", style_bold(&format!("{:.1}", status.total_score)));
    if progress.completed {
        print_success("Challenge completed!");
    }

    print_group("Valid", &status.pull_requests.valid, style_green);
    print_group("Pending", &status.pull_requests.pending, style_yellow);
    print_group("Invalid", &status.pull_requests.invalid, style_red);

    if !status.recommendations.is_empty() {
        println!();
        println!("{}", style_bold("Recommendations"));
        for r in &status.recommendations {
            println!("  - {}", r);
        }
    }
    Ok(())
}

fn print_group(label: &str, prs: &[PullRequestLine], paint: fn(&str) -> String) {
    if prs.is_empty() {
        return;
    }
    println!();
    println!("{} ({})", paint(label), prs.len());
    for pr in prs {
        println!("  {:>5.1}  {}", pr.score, truncate(&pr.title, 60));
        println!("         {}", style_dim(&pr.url));
        for reason in &pr.reasons {
            println!("         {}", style_dim(reason));
        }
    }
}

pub async fn leaderboard(server: &str, users: &[String]) -> Result<()> {
    print_header("Hacktoberfest Leaderboard");

    let client = ContestClient::new(server);
    let entries = client.hacktoberfest_leaderboard(users).await?;

    if entries.is_empty() {
        print_info("No participants to rank.");
        return Ok(());
    }

    println!();
    println!("{:>4}  {:<24}  {:>8}  {:>9}  Done", "Rank", "User", "Score", "Valid PRs");
    println!("{}", "─".repeat(60));
    for entry in &entries {
        let rank = format!("#{}", entry.rank);
        let rank_styled = match entry.rank {
            1 => style_yellow(&rank),
            2 | 3 => style_cyan(&rank),
            _ => rank,
        };
        let done = if entry.completed {
            style_green("✓")
        } else {
            style_dim("-")
        };
        println!(
            "{:>4}  {:<24}  {:>8.1}  {:>9}  {}",
            rank_styled,
            truncate(&entry.username, 24),
            entry.score,
            entry.valid_prs,
            done
        );
        if let Some(error) = &entry.error {
            println!("        {}", style_red(error));
        }
    }

    println!();
    println!("Total participants: {}", entries.len());
    Ok(())
}
