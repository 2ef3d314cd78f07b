//! Fragment download engine.
//!
//! Provides:
//! - A bounded, self-feeding worker pool per fragment list
//! - Per-fragment retry with a fixed delay ladder
//! - Decrypt/transcode hooks and the AES-128 decryptor
//! - Header escalation for fragments that exhausted their retries

pub mod config;
pub mod escalation;
pub mod events;
pub mod hooks;
pub mod pool;
pub mod retry;

pub use config::EngineConfig;
pub use escalation::{FailureHandler, HeaderEscalation};
pub use events::{EngineEvent, EngineState, ResumeStats};
pub use hooks::{Aes128Decryptor, Decryptor, FragmentHook, KeyedDecryptHook};
pub use pool::{EngineStats, EngineSummary, FragmentEngine};
pub use retry::RetryPolicy;
