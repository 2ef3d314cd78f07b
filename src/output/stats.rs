//! Statistics reporting.

use std::time::Duration;

use console::style;

use crate::queue::QueueStatus;

/// Totals collected while the CLI drives the queue.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub fragments_downloaded: usize,
    pub files_written: usize,
    pub bytes_written: u64,
}

impl RunStats {
    pub fn has_failures(&self) -> bool {
        self.tasks_failed > 0
    }
}

/// Print the end-of-run statistics.
pub fn print_run_stats(stats: &RunStats, status: &QueueStatus, elapsed: Duration) {
    println!();
    println!("{}", style("═".repeat(50)).dim());
    println!("{}", style("Statistics:").bold());
    println!("  Completed: {}", style(stats.tasks_completed).green());
    if stats.tasks_failed > 0 {
        println!("  Failed:    {}", style(stats.tasks_failed).red());
    }
    if status.paused_tasks > 0 {
        println!("  Paused:    {}", style(status.paused_tasks).yellow());
    }
    println!("  Fragments: {}", stats.fragments_downloaded);
    println!(
        "  Written:   {} files, {}",
        stats.files_written,
        format_bytes(stats.bytes_written)
    );
    println!("  Elapsed:   {:.1}s", elapsed.as_secs_f64());
    println!("{}", style("═".repeat(50)).dim());
}

/// Print the queue counters on one line.
pub fn print_queue_status(status: &QueueStatus) {
    println!(
        "Queue: {} active / {} max, {} queued, {} paused, {} failed, {} completed",
        style(status.active_downloads).cyan(),
        status.max_concurrent_downloads,
        status.queue_length,
        style(status.paused_tasks).yellow(),
        style(status.failed_tasks).red(),
        style(status.completed_tasks).green()
    );
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
