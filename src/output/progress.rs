//! Progress bar utilities.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const TASK_TEMPLATE: &str =
    "{spinner:.green} {prefix:>5} {msg:30!} [{bar:40.cyan/blue}] {pos}/{len} ({eta})";

fn task_style() -> ProgressStyle {
    ProgressStyle::with_template(TASK_TEMPLATE)
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Create a spinner for long-running operations.
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner
}

/// One fragment-count bar per task, stacked in a single terminal region.
pub struct TaskProgress {
    multi: MultiProgress,
    bars: HashMap<u64, ProgressBar>,
    hidden: bool,
}

impl TaskProgress {
    pub fn new(hidden: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            hidden,
        }
    }

    fn bar(&mut self, id: u64, title: &str, total: usize) -> &ProgressBar {
        let multi = &self.multi;
        let hidden = self.hidden;
        self.bars.entry(id).or_insert_with(|| {
            let bar = if hidden {
                ProgressBar::hidden()
            } else {
                multi.add(ProgressBar::new(total as u64))
            };
            bar.set_length(total as u64);
            bar.set_style(task_style());
            bar.set_prefix(format!("#{}", id));
            bar.set_message(title.to_string());
            bar
        })
    }

    /// Show or refresh a task's bar.
    pub fn update(&mut self, id: u64, title: &str, downloaded: usize, total: usize) {
        let bar = self.bar(id, title, total);
        bar.set_length(total as u64);
        bar.set_position(downloaded as u64);
    }

    /// Finish a task's bar with a closing message.
    pub fn finish(&mut self, id: u64, message: &str) {
        if let Some(bar) = self.bars.remove(&id) {
            bar.finish_with_message(message.to_string());
        }
    }

    /// Leave a task's bar where it stopped.
    pub fn abandon(&mut self, id: u64, message: &str) {
        if let Some(bar) = self.bars.remove(&id) {
            bar.abandon_with_message(message.to_string());
        }
    }

    /// Print a line above the bars without tearing them.
    pub fn println(&self, line: &str) {
        if self.hidden {
            return;
        }
        if self.multi.println(line).is_err() {
            println!("{}", line);
        }
    }

    pub fn active(&self) -> usize {
        self.bars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bars_track_tasks() {
        let mut progress = TaskProgress::new(true);
        progress.update(1, "a", 0, 10);
        progress.update(2, "b", 3, 4);
        progress.update(1, "a", 5, 10);
        assert_eq!(progress.active(), 2);

        progress.finish(1, "done");
        progress.abandon(2, "paused");
        progress.finish(3, "unknown");
        assert_eq!(progress.active(), 0);
    }
}
