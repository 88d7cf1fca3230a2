//! keyframe coordinates → on-disk jpeg path
//!
//! the archive layout is fixed:
//!
//! ```text
//! DATA_ROOT/Keyframes_L{group:02}/L{group:02}_V{video:03}/{keyframe:03}.jpg
//! ```
//!
//! the path is reported whether or not the file exists; the image-serving
//! handler substitutes a placeholder on miss.

use std::path::{Path, PathBuf};

use crate::providers::KeyframeRow;

pub fn keyframe_path(data_root: &Path, row: &KeyframeRow) -> PathBuf {
    data_root
        .join(format!("Keyframes_L{:02}", row.group_num))
        .join(format!("L{:02}_V{:03}", row.group_num, row.video_num))
        .join(format!("{:03}.jpg", row.keyframe_num))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(group_num: i64, video_num: i64, keyframe_num: i64) -> KeyframeRow {
        KeyframeRow {
            key: 0,
            group_num,
            video_num,
            keyframe_num,
        }
    }

    #[test]
    fn test_zero_padding() {
        let path = keyframe_path(Path::new("/data"), &row(5, 2, 7));
        assert_eq!(path, Path::new("/data/Keyframes_L05/L05_V002/007.jpg"));
    }

    #[test]
    fn test_wide_values_are_not_truncated() {
        let path = keyframe_path(Path::new("/data"), &row(123, 4567, 89012));
        assert_eq!(path, Path::new("/data/Keyframes_L123/L123_V4567/89012.jpg"));
    }
}
