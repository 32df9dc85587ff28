use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

pub fn progress_bar(message: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template("  {spinner:.cyan} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar
}

pub fn heading(title: &str) {
    println!();
    println!("  {}", title.cyan().bold().underline());
    println!();
}

pub fn success(message: &str) {
    println!("  {} {}", "✓".green().bold(), message);
}

pub fn note(message: &str) {
    println!("  {} {}", "→".cyan(), message.dimmed());
}

pub fn warning(message: &str) {
    println!("  {} {}", "!".yellow().bold(), message);
}
