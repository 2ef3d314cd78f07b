//! Filesystem module.
//!
//! Provides:
//! - Output and segment directory layout
//! - Segment and output filename generation

pub mod naming;
pub mod paths;

pub use naming::{
    generate_group_name, make_unique_filename, sanitize_filename, sanitize_path_component,
    segment_file_name, segment_name, with_extension,
};
pub use paths::{ensure_dir, segment_root, task_output_path, SEGMENTS_DIR};
