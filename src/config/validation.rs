//! Configuration validation logic.

use crate::config::loader::Config;
use crate::error::{Error, Result};
use crate::queue::{MAX_CONCURRENT, MIN_CONCURRENT};

/// Maximum worker count per engine.
const MAX_THREADS: usize = 64;

/// Maximum retries per fragment.
const MAX_RETRIES: u32 = 10;

/// Validate the entire configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_thread(config.engine.thread)?;
    validate_retries(config.engine.max_retries, &config.engine.retry_delays_ms)?;
    validate_concurrency(config.queue.max_concurrent_downloads)?;

    if config.output.user_agent.trim().is_empty() {
        return Err(Error::MissingConfig("user_agent".to_string()));
    }

    // Merging reads segments back from disk.
    if config.output.merge_segments && !config.engine.save_segments {
        return Err(Error::ConfigValidation {
            field: "merge_segments".to_string(),
            message: "Requires engine.save_segments to be enabled".to_string(),
        });
    }

    Ok(())
}

/// Validate the per-engine worker count.
pub fn validate_thread(thread: usize) -> Result<()> {
    if thread == 0 || thread > MAX_THREADS {
        return Err(Error::ConfigValidation {
            field: "thread".to_string(),
            message: format!("Must be between 1 and {} (got {})", MAX_THREADS, thread),
        });
    }
    Ok(())
}

/// Validate the retry budget and its delay table.
pub fn validate_retries(max_retries: u32, delays_ms: &[u64]) -> Result<()> {
    if max_retries > MAX_RETRIES {
        return Err(Error::ConfigValidation {
            field: "max_retries".to_string(),
            message: format!("Must be at most {} (got {})", MAX_RETRIES, max_retries),
        });
    }

    if max_retries > 0 && delays_ms.is_empty() {
        return Err(Error::ConfigValidation {
            field: "retry_delays_ms".to_string(),
            message: "At least one delay is required when retries are enabled".to_string(),
        });
    }

    Ok(())
}

/// Validate the queue concurrency cap.
pub fn validate_concurrency(max: usize) -> Result<()> {
    if !(MIN_CONCURRENT..=MAX_CONCURRENT).contains(&max) {
        return Err(Error::ConfigValidation {
            field: "max_concurrent_downloads".to_string(),
            message: format!(
                "Must be between {} and {} (got {})",
                MIN_CONCURRENT, MAX_CONCURRENT, max
            ),
        });
    }
    Ok(())
}
