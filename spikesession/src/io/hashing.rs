use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use sha1::{Digest, Sha1};

use crate::error::SessionResult;

const CHUNK: usize = 8192;

/// SHA-1 hex digest of a file, or `None` when it does not exist.
/// Used to detect that a recording's labels changed since a result was derived from them.
pub fn spike_labels_hash(path: &Path) -> SessionResult<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha1::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spike_labels.npy");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            spike_labels_hash(&path).unwrap().as_deref(),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
    }

    #[test]
    fn test_large_file_spans_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let mut content = vec![7u8; CHUNK * 3 + 11];
        fs::write(&a, &content).unwrap();
        content[CHUNK * 2 + 5] = 8;
        fs::write(&b, &content).unwrap();
        assert_ne!(spike_labels_hash(&a).unwrap(), spike_labels_hash(&b).unwrap());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(spike_labels_hash(&dir.path().join("nope")).unwrap(), None);
    }
}
