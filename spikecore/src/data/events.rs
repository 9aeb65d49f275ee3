use std::collections::BTreeMap;
use std::fmt;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Returned when buffers handed to [`FeatureMatrix`] or [`LabeledEvents`] disagree in shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeError {
    /// Flat buffer length is not a multiple of the row width.
    RaggedBuffer { len: usize, n_dims: usize },
    /// Row width of zero with a non-empty buffer.
    ZeroWidth,
    /// A row passed to `from_rows` has a different width than the first row.
    RowWidth { row: usize, expected: usize, found: usize },
    /// Number of labels does not match the number of feature rows.
    LabelCount { rows: usize, labels: usize },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::RaggedBuffer { len, n_dims } => {
                write!(f, "buffer of length {} is not a multiple of {} dims", len, n_dims)
            }
            ShapeError::ZeroWidth => write!(f, "feature rows must have at least one dimension"),
            ShapeError::RowWidth { row, expected, found } => {
                write!(f, "row {} has {} dims, expected {}", row, found, expected)
            }
            ShapeError::LabelCount { rows, labels } => {
                write!(f, "{} feature rows but {} labels", rows, labels)
            }
        }
    }
}

impl std::error::Error for ShapeError {}

/// Row-major `n_rows x n_dims` matrix of spike features, one row per event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    values: Vec<f32>,
    n_dims: usize,
}

impl FeatureMatrix {
    pub fn new(values: Vec<f32>, n_dims: usize) -> Result<Self, ShapeError> {
        if n_dims == 0 {
            return if values.is_empty() {
                Ok(Self { values, n_dims: 1 })
            } else {
                Err(ShapeError::ZeroWidth)
            };
        }
        if values.len() % n_dims != 0 {
            return Err(ShapeError::RaggedBuffer { len: values.len(), n_dims });
        }
        Ok(Self { values, n_dims })
    }

    /// Build from nested rows; all rows must share the width of the first one.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, ShapeError> {
        let n_dims = rows.first().map(|r| r.len()).unwrap_or(1);
        if let Some((row, r)) = rows.iter().find_position(|r| r.len() != n_dims) {
            return Err(ShapeError::RowWidth { row, expected: n_dims, found: r.len() });
        }
        Self::new(rows.concat(), n_dims)
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.values.len() / self.n_dims
    }

    #[inline]
    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.values[i * self.n_dims..(i + 1) * self.n_dims]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks_exact(self.n_dims)
    }
}

/// Spike events of one recording: features for neighbour search plus one cluster label per event.
/// Labels `<= 0` mean "not assigned to a unit".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabeledEvents {
    pub features: FeatureMatrix,
    pub labels: Vec<i32>,
}

impl LabeledEvents {
    pub fn new(features: FeatureMatrix, labels: Vec<i32>) -> Result<Self, ShapeError> {
        if features.n_rows() != labels.len() {
            return Err(ShapeError::LabelCount { rows: features.n_rows(), labels: labels.len() });
        }
        Ok(Self { features, labels })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Event indices of every unit (label > 0), keyed by label, indices in event order.
    /// One pass over the labels.
    pub fn unit_event_indices(&self) -> BTreeMap<i32, Vec<usize>> {
        self.labels
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l > 0)
            .map(|(i, &l)| (l, i))
            .into_group_map()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_matrix_rows() {
        let m = FeatureMatrix::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3).unwrap();
        assert_eq!(m.n_rows(), 2);
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
        assert_eq!(m.rows().count(), 2);
    }

    #[test]
    fn test_feature_matrix_rejects_ragged() {
        let err = FeatureMatrix::new(vec![1.0, 2.0, 3.0], 2).unwrap_err();
        assert_eq!(err, ShapeError::RaggedBuffer { len: 3, n_dims: 2 });

        let err = FeatureMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(err, ShapeError::RowWidth { row: 1, expected: 2, found: 1 });
    }

    #[test]
    fn test_empty_matrix() {
        let m = FeatureMatrix::from_rows(&[]).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.n_rows(), 0);
    }

    #[test]
    fn test_unit_event_indices_skip_unassigned() {
        let features = FeatureMatrix::new(vec![0.0; 6], 1).unwrap();
        let events = LabeledEvents::new(features, vec![3, 0, 1, 3, -1, 1]).unwrap();
        let units = events.unit_event_indices();
        assert_eq!(units.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(units[&3], vec![0, 3]);
        assert_eq!(units[&1], vec![2, 5]);
    }

    #[test]
    fn test_label_count_mismatch() {
        let features = FeatureMatrix::new(vec![0.0; 4], 2).unwrap();
        let err = LabeledEvents::new(features, vec![1]).unwrap_err();
        assert_eq!(err, ShapeError::LabelCount { rows: 2, labels: 1 });
    }
}
