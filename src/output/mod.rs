//! Output module for console output and progress.
//!
//! Provides:
//! - Colored console output
//! - Per-task progress bars
//! - Statistics reporting
//! - Merging downloaded segments into the final file

pub mod console;
pub mod merge;
pub mod progress;
pub mod stats;

pub use console::{
    print_banner, print_config_summary, print_error, print_info, print_success, print_task_list,
    print_warning,
};
pub use merge::{finalize_stream, merge_task, output_name, MergeReport};
pub use progress::{create_spinner, TaskProgress};
pub use stats::{format_bytes, print_queue_status, print_run_stats, RunStats};
