//! Session configuration (`realtime512.yaml`)

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use serde::{Deserialize, Serialize};

use spikecore::algorithm::timeline::SessionGeometry;
use crate::error::{SessionError, SessionResult};

fn default_n_channels() -> usize {
    512
}

fn default_sampling_frequency() -> f64 {
    20000.0
}

/// Acquisition parameters shared by every recording of the session.
/// Unknown keys in the YAML file are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Channels interleaved in each raw frame (default: 512)
    #[serde(default = "default_n_channels")]
    pub n_channels: usize,

    /// Frames per second (default: 20000 Hz)
    #[serde(default = "default_sampling_frequency")]
    pub sampling_frequency: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            n_channels: default_n_channels(),
            sampling_frequency: default_sampling_frequency(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> SessionResult<Self> {
        if !path.exists() {
            return Err(SessionError::MissingConfig(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let config: SessionConfig = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.n_channels == 0 {
            return Err(SessionError::Config("n_channels must be positive".to_string()));
        }
        if !(self.sampling_frequency.is_finite() && self.sampling_frequency > 0.0) {
            return Err(SessionError::Config(format!(
                "sampling_frequency must be positive, got {}",
                self.sampling_frequency
            )));
        }
        Ok(())
    }

    pub fn geometry(&self) -> SessionGeometry {
        SessionGeometry {
            n_channels: self.n_channels,
            sampling_frequency: self.sampling_frequency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime512.yaml");
        fs::write(&path, "n_channels: 64\nsome_other_key: foo\n").unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.n_channels, 64);
        assert_eq!(config.sampling_frequency, 20000.0);
    }

    #[test]
    fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::load(&dir.path().join("realtime512.yaml")).unwrap_err();
        assert!(matches!(err, SessionError::MissingConfig(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime512.yaml");
        fs::write(&path, "n_channels: 0\n").unwrap();
        assert!(matches!(SessionConfig::load(&path), Err(SessionError::Config(_))));

        fs::write(&path, "sampling_frequency: [1, 2]\n").unwrap();
        assert!(matches!(SessionConfig::load(&path), Err(SessionError::Config(_))));
    }

    #[test]
    fn test_geometry() {
        let g = SessionConfig { n_channels: 2, sampling_frequency: 10.0 }.geometry();
        assert_eq!(g.duration_sec(400), 10.0);
    }
}
