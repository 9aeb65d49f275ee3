//! Cross-recording unit matching.
//!
//! Two recordings are clustered independently, so their label spaces are unrelated.
//! Every event votes for a label in the other recording through its k nearest
//! neighbours in feature space; every unit then takes the consensus of its events.
//! A pair of units is kept only when each one is the other's consensus pick.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::neighbors::{NeighborIndex, NeighborTable};
use crate::data::events::LabeledEvents;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchError {
    /// Feature rows of the two recordings have different widths.
    DimensionMismatch { x: usize, y: usize },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::DimensionMismatch { x, y } => {
                write!(f, "feature dimensionality differs: x has {}, y has {}", x, y)
            }
        }
    }
}

impl std::error::Error for MatchError {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchOpts {
    /// Neighbours consulted per event (clamped to the other recording's event count).
    pub n_neighbors: usize,
}

impl Default for MatchOpts {
    fn default() -> Self {
        Self { n_neighbors: 10 }
    }
}

/// Best match of one source unit in the target recording.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectionalCandidate {
    pub unit: i32,
    pub best_match: i32,
    /// Fraction of the unit's events whose event-level vote equals `best_match`.
    pub score: f64,
    pub num_events: usize,
}

/// A pair of units that pick each other; the persisted record per recording pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutualMatch {
    pub unit_x: i32,
    pub unit_y: i32,
    pub score_x_to_y: f64,
    pub score_y_to_x: f64,
    pub overall_score: f64,
}

impl MutualMatch {
    /// Both units are real (> 0) and every score is a fraction in [0, 1].
    pub fn is_valid(&self) -> bool {
        let unit_score = |s: f64| (0.0..=1.0).contains(&s);
        self.unit_x > 0
            && self.unit_y > 0
            && unit_score(self.score_x_to_y)
            && unit_score(self.score_y_to_x)
            && unit_score(self.overall_score)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitMatchResult {
    /// Ascending by `unit_x`.
    pub mutual_matches: Vec<MutualMatch>,
    /// Per X event, the majority label among its nearest Y events (0 if none).
    pub event_matches_x_to_y: Vec<i32>,
    /// Per Y event, the majority label among its nearest X events (0 if none).
    pub event_matches_y_to_x: Vec<i32>,
    pub candidates_x_to_y: BTreeMap<i32, DirectionalCandidate>,
    pub candidates_y_to_x: BTreeMap<i32, DirectionalCandidate>,
}

/// Most frequent label; ties go to the smallest label. Empty input gives 0.
pub fn majority_label<I: IntoIterator<Item = i32>>(labels: I) -> i32 {
    // ascending runs: strict `>` keeps the smallest label on ties
    let mut best = (0, 0usize);
    for (count, label) in labels.into_iter().sorted_unstable().dedup_with_count() {
        if count > best.1 {
            best = (label, count);
        }
    }
    best.0
}

/// Most frequent label and its tally; ties go to the label seen first in `labels`.
/// Empty input gives `(0, 0)`.
pub fn consensus_label(labels: &[i32]) -> (i32, usize) {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for &l in labels {
        *counts.entry(l).or_default() += 1;
    }
    let mut best = (0, 0usize);
    for &l in labels {
        let c = counts[&l];
        if c > best.1 {
            best = (l, c);
        }
    }
    best
}

/// Event-level vote: for each query row, the majority label of its neighbours in the target.
pub fn event_best_matches(table: &NeighborTable, n_queries: usize, target_labels: &[i32]) -> Vec<i32> {
    (0..n_queries)
        .into_par_iter()
        .map(|i| majority_label(table.row(i).iter().map(|&j| target_labels[j])))
        .collect()
}

/// Cluster-level consensus for every unit (> 0) of `source`.
pub fn directional_candidates(
    source: &LabeledEvents,
    event_matches: &[i32],
) -> BTreeMap<i32, DirectionalCandidate> {
    source
        .unit_event_indices()
        .into_par_iter()
        .filter_map(|(unit, indices)| {
            let votes: Vec<i32> = indices.into_iter().map(|i| event_matches[i]).collect();
            if votes.is_empty() {
                return None;
            }
            let (best_match, count) = consensus_label(&votes);
            Some((unit, DirectionalCandidate {
                unit,
                best_match,
                score: count as f64 / votes.len() as f64,
                num_events: votes.len(),
            }))
        })
        .collect()
}

/// Keep `(kx, ky)` when `kx -> ky` and `ky -> kx`; `ky` must be a real unit.
pub fn mutual_matches(
    x_to_y: &BTreeMap<i32, DirectionalCandidate>,
    y_to_x: &BTreeMap<i32, DirectionalCandidate>,
) -> Vec<MutualMatch> {
    x_to_y
        .values()
        .filter_map(|cx| {
            let ky = cx.best_match;
            if ky <= 0 {
                return None;
            }
            let cy = y_to_x.get(&ky)?;
            if cy.best_match != cx.unit {
                return None;
            }
            Some(MutualMatch {
                unit_x: cx.unit,
                unit_y: ky,
                score_x_to_y: cx.score,
                score_y_to_x: cy.score,
                overall_score: (cx.score + cy.score) / 2.0,
            })
        })
        .collect()
}

/// Match the units of recording X against those of recording Y.
pub fn compute_unit_matches(
    x: &LabeledEvents,
    y: &LabeledEvents,
    opts: &MatchOpts,
) -> Result<UnitMatchResult, MatchError> {
    if !x.is_empty() && !y.is_empty() && x.features.n_dims() != y.features.n_dims() {
        return Err(MatchError::DimensionMismatch {
            x: x.features.n_dims(),
            y: y.features.n_dims(),
        });
    }

    let k = opts.n_neighbors;
    let (nearest_y_to_x, nearest_x_to_y) = rayon::join(
        || NeighborIndex::build(&x.features).query(&y.features, k),
        || NeighborIndex::build(&y.features).query(&x.features, k),
    );

    let event_matches_y_to_x = event_best_matches(&nearest_y_to_x, y.len(), &x.labels);
    let event_matches_x_to_y = event_best_matches(&nearest_x_to_y, x.len(), &y.labels);

    let candidates_y_to_x = directional_candidates(y, &event_matches_y_to_x);
    let candidates_x_to_y = directional_candidates(x, &event_matches_x_to_y);

    let mutual_matches = mutual_matches(&candidates_x_to_y, &candidates_y_to_x);

    log::debug!(
        "matched {} x-units / {} y-units -> {} mutual (k={})",
        candidates_x_to_y.len(),
        candidates_y_to_x.len(),
        mutual_matches.len(),
        nearest_x_to_y.k().max(nearest_y_to_x.k()),
    );

    Ok(UnitMatchResult {
        mutual_matches,
        event_matches_x_to_y,
        event_matches_y_to_x,
        candidates_x_to_y,
        candidates_y_to_x,
    })
}
