//! Console output utilities.

use console::style;

use crate::config::Config;
use crate::queue::{Task, TaskStatus};

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", style("INFO").cyan().bold(), message);
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", style("OK").green().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", style("WARN").yellow().bold(), message);
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", style("ERROR").red().bold(), message);
}

/// Print the application banner.
pub fn print_banner() {
    let banner = r#"
╔═══════════════════════════════════════════════════════╗
║     m3u8-downloader                                   ║
║     Resumable HLS fragment downloads                  ║
╚═══════════════════════════════════════════════════════╝
"#;
    println!("{}", style(banner).cyan());
}

/// Print configuration summary.
pub fn print_config_summary(config: &Config) {
    println!();
    println!("{}", style("Configuration:").bold());
    println!(
        "  Threads per task: {}",
        config.engine.thread
    );
    println!(
        "  Concurrent tasks: {}",
        config.queue.max_concurrent_downloads
    );
    println!(
        "  Retries:          {} ({:?} ms)",
        config.engine.max_retries, config.engine.retry_delays_ms
    );
    println!("  Directory:        {}", config.download_directory().display());
    println!("  State:            {}", config.state_directory().display());
    println!();
}

/// Print one line per known task.
pub fn print_task_list(tasks: &[Task]) {
    if tasks.is_empty() {
        print_info("No tasks");
        return;
    }

    println!();
    println!("{}", style("Tasks:").bold());
    for task in tasks {
        let status = match task.status {
            TaskStatus::Completed => style(task.status.to_string()).green(),
            TaskStatus::Failed => style(task.status.to_string()).red(),
            TaskStatus::Paused => style(task.status.to_string()).yellow(),
            TaskStatus::Queued | TaskStatus::Downloading => style(task.status.to_string()).cyan(),
        };
        println!(
            "  #{:<4} {:<12} {:>3}%  {} ({}/{} fragments)",
            task.id,
            status,
            task.progress,
            task.title,
            task.downloaded_fragments.len(),
            task.range_len()
        );
        if let Some(error) = &task.error {
            println!("         {}", style(error).dim());
        }
    }
    println!();
}
