//! Artifact sets produced by the decoder.
//!
//! Decoded frames follow the naming convention `<id>_dec_NNNN.ply`, with a
//! zero-padded frame index. Consumption relies on that convention to
//! validate what the decoder left behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::work_item::WorkItem;

/// Extension of decoded frame files
pub const FRAME_EXTENSION: &str = "ply";

/// The decoded output of one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSet {
    /// Id of the work item that produced this set
    pub item_id: String,

    /// Frame files in frame-index order
    pub files: Vec<PathBuf>,

    /// When the decode finished
    pub produced_at: DateTime<Utc>,

    /// Attempts it took to produce this set
    pub attempts: u32,
}

impl ArtifactSet {
    /// Build the artifact set for a successfully decoded item
    pub fn from_item(item: &WorkItem, files: Vec<PathBuf>) -> Self {
        Self {
            item_id: item.id.clone(),
            files,
            produced_at: Utc::now(),
            attempts: item.attempt,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Whether `found` frames satisfy the expected count.
///
/// With an expected count the match must be exact; without one any
/// non-empty set passes.
pub fn frame_count_matches(expected: Option<usize>, found: usize) -> bool {
    match expected {
        Some(expected) => found == expected,
        None => found > 0,
    }
}

/// File name of frame `index` for item `id`
pub fn frame_file_name(id: &str, index: u32) -> String {
    format!("{}_dec_{:04}.{}", id, index, FRAME_EXTENSION)
}

/// Parse the frame index out of a file name, if it belongs to `id`
pub fn parse_frame_index(id: &str, path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let digits = name
        .strip_prefix(id)?
        .strip_prefix("_dec_")?
        .strip_suffix(FRAME_EXTENSION)?
        .strip_suffix('.')?;

    if digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_rule() {
        assert!(frame_count_matches(Some(10), 10));
        assert!(!frame_count_matches(Some(10), 9));
        assert!(!frame_count_matches(Some(2), 3));
        assert!(frame_count_matches(None, 1));
        assert!(!frame_count_matches(None, 0));
    }

    #[test]
    fn test_frame_file_name_is_zero_padded() {
        assert_eq!(frame_file_name("low_s0", 7), "low_s0_dec_0007.ply");
        assert_eq!(frame_file_name("low_s0", 12345), "low_s0_dec_12345.ply");
    }

    #[test]
    fn test_parse_frame_index() {
        let id = "high_s3";
        assert_eq!(
            parse_frame_index(id, Path::new("/out/high_s3/high_s3_dec_0042.ply")),
            Some(42)
        );
        assert_eq!(parse_frame_index(id, Path::new("high_s3_dec_42.ply")), None);
        assert_eq!(parse_frame_index(id, Path::new("high_s3_dec_0042.bin")), None);
        assert_eq!(parse_frame_index(id, Path::new("low_s3_dec_0042.ply")), None);
        assert_eq!(parse_frame_index(id, Path::new("high_s3_dec_00a2.ply")), None);
    }

    #[test]
    fn test_artifact_set_from_item() {
        let mut item = WorkItem::new("mid_s2", "/streams/mid_s2.bin");
        item.begin_attempt();
        item.begin_attempt();

        let set = ArtifactSet::from_item(&item, vec![PathBuf::from("mid_s2_dec_0000.ply")]);
        assert_eq!(set.item_id, "mid_s2");
        assert_eq!(set.attempts, 2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_artifact_set_serialization() {
        let item = WorkItem::new("low_s0", "/streams/low_s0.bin");
        let set = ArtifactSet::from_item(&item, vec![PathBuf::from("low_s0_dec_0000.ply")]);

        let json = serde_json::to_string(&set).unwrap();
        let parsed: ArtifactSet = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, set);
    }
}
