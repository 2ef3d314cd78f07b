//! Task queue on top of the fragment engine.

mod manager;
mod persistence;
mod task;

pub use manager::{task_group, QueueEvent, QueueManager, QueueStatus, MAX_CONCURRENT, MIN_CONCURRENT};
pub use persistence::{
    clear_resume, load_collection, load_resume, resume_key, save_collection, save_resume,
    ResumeRecord, TaskCollection, TASKS_KEY,
};
pub use task::{Task, TaskConfig, TaskSettings, TaskStatus};
