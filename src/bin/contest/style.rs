//! Terminal styling utilities

const CYAN: &str = "36";
const GREEN: &str = "32";
const RED: &str = "31";
const YELLOW: &str = "33";
const DIM: &str = "2";
const BOLD: &str = "1";

fn paint(code: &str, s: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", code, s)
}

pub fn style_cyan(s: &str) -> String {
    paint(CYAN, s)
}

pub fn style_green(s: &str) -> String {
    paint(GREEN, s)
}

pub fn style_red(s: &str) -> String {
    paint(RED, s)
}

pub fn style_yellow(s: &str) -> String {
    paint(YELLOW, s)
}

pub fn style_dim(s: &str) -> String {
    paint(DIM, s)
}

pub fn style_bold(s: &str) -> String {
    paint(BOLD, s)
}

/// Marker glyph followed by the message
fn line(marker: String, msg: &str) -> String {
    format!("{} {}", marker, msg)
}

pub fn print_success(msg: &str) {
    println!("{}", line(style_green("✓"), msg));
}

pub fn print_error(msg: &str) {
    eprintln!("{}", line(style_red("✗"), msg));
}

pub fn print_warning(msg: &str) {
    println!("{}", line(style_yellow("⚠"), msg));
}

pub fn print_info(msg: &str) {
    println!("{}", line(style_cyan("ℹ"), msg));
}

/// Bold title over a rule of the same width
pub fn print_header(title: &str) {
    let rule = "─".repeat(title.chars().count());
    println!("\n{}\n{}", style_bold(title), rule);
}

/// Colour a status string the way the server reports it
pub fn style_status(status: &str) -> String {
    match status.to_ascii_lowercase().as_str() {
        "active" | "healthy" => style_green(status),
        "upcoming" | "degraded" => style_yellow(status),
        "cancelled" | "unhealthy" => style_red(status),
        _ => style_dim(status),
    }
}

/// Cut `s` to `max` characters, marking the cut with "..."
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Text progress bar, `width` cells wide
pub fn progress_bar(percentage: f64, width: usize) -> String {
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-rather-long-name", 10), "a-rathe...");
    }

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(progress_bar(0.0, 4), "[░░░░]");
        assert_eq!(progress_bar(50.0, 4), "[██░░]");
        assert_eq!(progress_bar(250.0, 4), "[████]");
    }
}
