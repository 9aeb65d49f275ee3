use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SessionError, SessionResult};

pub const CONFIG_FILE: &str = "realtime512.yaml";
pub const FOCUS_UNITS_FILE: &str = "focus_units.json";
pub const RAW_EXTENSION: &str = "bin";

pub const SPIKE_TIMES_FILE: &str = "spike_times.npy";
pub const SPIKE_LABELS_FILE: &str = "spike_labels.npy";
pub const SPIKE_FRAMES_FILE: &str = "spike_frames.npy";

pub const MUTUAL_MATCHES_FILE: &str = "mutual_matches.json";
pub const MATCH_INFO_FILE: &str = "match_info.json";
pub const EVENT_MATCHES_X_TO_Y_FILE: &str = "event_matches_x_to_y.npy";
pub const EVENT_MATCHES_Y_TO_X_FILE: &str = "event_matches_y_to_x.npy";

/// A raw recording file on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFile {
    pub filename: String,
    pub num_bytes: u64,
}

/// Directory layout of one session:
///
/// ```text
/// <root>/realtime512.yaml
/// <root>/focus_units.json
/// <root>/raw/<bin>
/// <root>/computed/coarse_sorting/<bin>/spike_{times,labels,frames}.npy
/// <root>/computed/unit_matching/<bin_x>/<bin_y>/mutual_matches.json
/// ```
#[derive(Clone, Debug)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn focus_units_path(&self) -> PathBuf {
        self.root.join(FOCUS_UNITS_FILE)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn computed_dir(&self) -> PathBuf {
        self.root.join("computed")
    }

    pub fn coarse_sorting_dir(&self, bin: &str) -> PathBuf {
        self.computed_dir().join("coarse_sorting").join(bin)
    }

    pub fn spike_times_path(&self, bin: &str) -> PathBuf {
        self.coarse_sorting_dir(bin).join(SPIKE_TIMES_FILE)
    }

    pub fn spike_labels_path(&self, bin: &str) -> PathBuf {
        self.coarse_sorting_dir(bin).join(SPIKE_LABELS_FILE)
    }

    pub fn spike_frames_path(&self, bin: &str) -> PathBuf {
        self.coarse_sorting_dir(bin).join(SPIKE_FRAMES_FILE)
    }

    pub fn has_coarse_sorting(&self, bin: &str) -> bool {
        self.spike_labels_path(bin).is_file()
    }

    pub fn unit_matching_dir(&self) -> PathBuf {
        self.computed_dir().join("unit_matching")
    }

    pub fn pair_dir(&self, bin_x: &str, bin_y: &str) -> PathBuf {
        self.unit_matching_dir().join(bin_x).join(bin_y)
    }

    /// Raw `.bin` recordings sorted by filename, i.e. chronologically.
    pub fn list_recordings(&self) -> SessionResult<Vec<RawFile>> {
        let raw_dir = self.raw_dir();
        if !raw_dir.is_dir() {
            return Err(SessionError::MissingDirectory(raw_dir));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&raw_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RAW_EXTENSION) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push(RawFile { filename: name.to_string(), num_bytes: meta.len() });
            }
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }
}

/// Sorted names of the sub-directories of `dir`; empty when `dir` does not exist.
pub(crate) fn sorted_subdirs(dir: &Path) -> SessionResult<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_recordings_sorted_with_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        fs::create_dir_all(layout.raw_dir()).unwrap();
        fs::write(layout.raw_dir().join("20240102.bin"), vec![0u8; 16]).unwrap();
        fs::write(layout.raw_dir().join("20240101.bin"), vec![0u8; 32]).unwrap();
        fs::write(layout.raw_dir().join("notes.txt"), b"skip").unwrap();
        fs::create_dir_all(layout.raw_dir().join("dir.bin")).unwrap();

        let files = layout.list_recordings().unwrap();
        assert_eq!(files, vec![
            RawFile { filename: "20240101.bin".to_string(), num_bytes: 32 },
            RawFile { filename: "20240102.bin".to_string(), num_bytes: 16 },
        ]);
    }

    #[test]
    fn test_missing_raw_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        assert!(matches!(layout.list_recordings(), Err(SessionError::MissingDirectory(_))));
    }

    #[test]
    fn test_paths() {
        let layout = SessionLayout::new("/data/session");
        assert_eq!(
            layout.spike_labels_path("a.bin"),
            PathBuf::from("/data/session/computed/coarse_sorting/a.bin/spike_labels.npy")
        );
        assert_eq!(
            layout.pair_dir("a.bin", "b.bin"),
            PathBuf::from("/data/session/computed/unit_matching/a.bin/b.bin")
        );
        assert!(!layout.has_coarse_sorting("a.bin"));
    }

    #[test]
    fn test_sorted_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("c"), b"").unwrap();
        assert_eq!(sorted_subdirs(dir.path()).unwrap(), vec!["a", "b"]);
        assert!(sorted_subdirs(&dir.path().join("missing")).unwrap().is_empty());
    }
}
