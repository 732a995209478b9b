//! Domain types for the decode pipeline.
//!
//! This module contains the core data structures:
//! - WorkItem: A discovered source tracked through the pipeline
//! - ArtifactSet: Frames produced by a successful decode

pub mod artifact;
pub mod work_item;

// Re-export commonly used types
pub use artifact::{
    frame_count_matches, frame_file_name, parse_frame_index, ArtifactSet, FRAME_EXTENSION,
};
pub use work_item::{ItemStatus, WorkItem};
