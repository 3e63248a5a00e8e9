//! Terminal output formatting.

use colored::Colorize;

/// Print a success message.
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg.red());
}

/// Print an info message.
pub fn info(msg: &str) {
    println!("{} {}", "→".cyan(), msg);
}

/// Print a header.
pub fn header(msg: &str) {
    println!("\n{}", msg.white().bold());
    println!("{}", "─".repeat(msg.chars().count()).dimmed());
}

/// Print a key-value pair.
pub fn kv(key: &str, value: &str) {
    println!("  {} {}", format!("{}:", key).dimmed(), value);
}

/// Print the verdict for one URL. Denials carry the redirect target.
pub fn verdict(url: &str, redirect: &str) {
    if redirect.is_empty() {
        println!("{} allow {}", "✓".green().bold(), url);
    } else {
        println!("{} deny {}", "✗".red().bold(), url.red());
        kv("Redirect", redirect);
    }
}
