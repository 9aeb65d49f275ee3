//! Session-wide spike train for one anchor unit.
//!
//! Recording files are laid end to end on a global clock. Each file contributes
//! exactly one segment: the anchor's own spikes, the spikes of the unit it was
//! matched to, or a gap that still advances the clock by the file's duration.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::algorithm::matching::MutualMatch;

/// Raw recordings store 16-bit samples.
pub const BYTES_PER_SAMPLE: u64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionGeometry {
    pub n_channels: usize,
    pub sampling_frequency: f64,
}

impl SessionGeometry {
    /// Duration of a raw recording of `num_bytes` bytes; trailing partial frames are dropped.
    #[inline]
    pub fn duration_sec(&self, num_bytes: u64) -> f64 {
        let bytes_per_frame = BYTES_PER_SAMPLE * self.n_channels as u64;
        if bytes_per_frame == 0 || self.sampling_frequency <= 0.0 {
            return 0.0;
        }
        (num_bytes / bytes_per_frame) as f64 / self.sampling_frequency
    }
}

/// One recording file of the session; filename order is chronological order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub filename: String,
    pub duration_sec: f64,
}

impl Recording {
    pub fn new(filename: impl Into<String>, duration_sec: f64) -> Self {
        Self { filename: filename.into(), duration_sec }
    }

    pub fn from_byte_size(filename: impl Into<String>, num_bytes: u64, geometry: &SessionGeometry) -> Self {
        Self::new(filename, geometry.duration_sec(num_bytes))
    }
}

/// Persisted mutual matches of one `(recording_x, recording_y)` comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairMatches {
    pub recording_x: String,
    pub recording_y: String,
    pub matches: Vec<MutualMatch>,
}

/// A unit in another recording that mutually matches the anchor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitLink {
    pub bin_filename: String,
    pub unit_id: i32,
    pub overall_score: f64,
}

#[derive(Clone, Debug)]
struct Adjacent {
    own_unit: i32,
    link: UnitLink,
}

/// Per-recording adjacency over all persisted pair results, built once per session.
#[derive(Clone, Debug, Default)]
pub struct MatchIndex {
    by_recording: HashMap<String, Vec<Adjacent>>,
}

impl MatchIndex {
    /// Entries that fail [`MutualMatch::is_valid`] are dropped.
    pub fn build<'a, I: IntoIterator<Item = &'a PairMatches>>(pairs: I) -> Self {
        let mut by_recording: HashMap<String, Vec<Adjacent>> = HashMap::new();
        for pair in pairs {
            for m in pair.matches.iter().filter(|m| m.is_valid()) {
                by_recording.entry(pair.recording_x.clone()).or_default().push(Adjacent {
                    own_unit: m.unit_x,
                    link: UnitLink {
                        bin_filename: pair.recording_y.clone(),
                        unit_id: m.unit_y,
                        overall_score: m.overall_score,
                    },
                });
                by_recording.entry(pair.recording_y.clone()).or_default().push(Adjacent {
                    own_unit: m.unit_y,
                    link: UnitLink {
                        bin_filename: pair.recording_x.clone(),
                        unit_id: m.unit_x,
                        overall_score: m.overall_score,
                    },
                });
            }
        }
        Self { by_recording }
    }

    /// Every unit mutually matched to `unit` of `filename`, once per `(file, unit)`, in index order.
    pub fn links_for(&self, filename: &str, unit: i32) -> Vec<UnitLink> {
        let mut out: Vec<UnitLink> = Vec::new();
        for adj in self.by_recording.get(filename).into_iter().flatten() {
            if adj.own_unit != unit {
                continue;
            }
            let seen = out
                .iter()
                .any(|l| l.bin_filename == adj.link.bin_filename && l.unit_id == adj.link.unit_id);
            if !seen {
                out.push(adj.link.clone());
            }
        }
        out
    }

    /// One resolved unit per other recording. Competing links to the same file keep the
    /// highest overall score (first wins on ties); the anchor's own file is never resolved.
    pub fn resolve(&self, filename: &str, unit: i32) -> HashMap<String, UnitLink> {
        let mut resolved: HashMap<String, UnitLink> = HashMap::new();
        for link in self.links_for(filename, unit) {
            if link.bin_filename == filename {
                continue;
            }
            match resolved.get(&link.bin_filename) {
                Some(prev) if prev.overall_score >= link.overall_score => {}
                _ => {
                    resolved.insert(link.bin_filename.clone(), link);
                }
            }
        }
        resolved
    }
}

/// Recording-local spike times (seconds) and their labels.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SpikeTrainData {
    pub times: Vec<f64>,
    pub labels: Vec<i32>,
}

/// Supplies per-recording sorting output; `None` when it is missing or unreadable.
pub trait SortingSource {
    fn load_spike_train(&self, filename: &str) -> Option<SpikeTrainData>;
}

impl SortingSource for HashMap<String, SpikeTrainData> {
    fn load_spike_train(&self, filename: &str) -> Option<SpikeTrainData> {
        self.get(filename).cloned()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// No mutual match links the anchor to this file.
    NoMatch,
    /// A unit was resolved but the sorting output could not be loaded.
    MissingSorting,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub bin_filename: String,
    pub unit_id: Option<i32>,
    pub start_time_offset: f64,
    pub end_time_offset: f64,
    pub num_spikes: usize,
    /// Global clock.
    pub spike_times: Vec<f64>,
    pub is_focus_unit: bool,
    pub is_gap: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_reason: Option<GapReason>,
}

impl Segment {
    fn gap(bin_filename: &str, start: f64, end: f64, reason: GapReason) -> Self {
        Self {
            bin_filename: bin_filename.to_string(),
            unit_id: None,
            start_time_offset: start,
            end_time_offset: end,
            num_spikes: 0,
            spike_times: Vec::new(),
            is_focus_unit: false,
            is_gap: true,
            gap_reason: Some(reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpikeTrain {
    pub total_spikes: usize,
    pub total_duration_sec: f64,
    pub segments: Vec<Segment>,
}

/// The unit whose identity is followed through the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub bin_filename: String,
    pub unit_id: i32,
}

/// Spikes of `unit` shifted onto the global clock; `None` if the arrays disagree in length.
fn shifted_unit_times(data: &SpikeTrainData, unit: i32, offset: f64) -> Option<Vec<f64>> {
    if data.times.len() != data.labels.len() {
        return None;
    }
    Some(
        data.times
            .iter()
            .zip(&data.labels)
            .filter(|&(_, &l)| l == unit)
            .map(|(&t, _)| t + offset)
            .collect(),
    )
}

/// Lay every recording end to end (sorted by filename) and fill in the anchor's spikes.
pub fn assemble_spike_train<S: SortingSource + ?Sized>(
    anchor: &Anchor,
    recordings: &[Recording],
    index: &MatchIndex,
    source: &S,
) -> SpikeTrain {
    let resolved = index.resolve(&anchor.bin_filename, anchor.unit_id);

    let mut ordered: Vec<&Recording> = recordings.iter().collect();
    ordered.sort_by(|a, b| a.filename.cmp(&b.filename));

    let (segments, total_duration_sec) = ordered.into_iter().fold(
        (Vec::with_capacity(recordings.len()), 0.0_f64),
        |(mut segments, offset), rec| {
            let start = offset;
            let end = offset + rec.duration_sec;
            let is_focus_file = rec.filename == anchor.bin_filename;

            let unit = if is_focus_file {
                Some(anchor.unit_id)
            } else {
                resolved.get(&rec.filename).map(|l| l.unit_id)
            };

            let segment = match unit {
                None => Segment::gap(&rec.filename, start, end, GapReason::NoMatch),
                Some(unit) => {
                    let times = source
                        .load_spike_train(&rec.filename)
                        .and_then(|data| shifted_unit_times(&data, unit, offset));
                    match times {
                        Some(spike_times) => Segment {
                            bin_filename: rec.filename.clone(),
                            unit_id: Some(unit),
                            start_time_offset: start,
                            end_time_offset: end,
                            num_spikes: spike_times.len(),
                            spike_times,
                            is_focus_unit: is_focus_file,
                            is_gap: false,
                            gap_reason: None,
                        },
                        None => {
                            log::warn!("no usable sorting for {}, emitting gap", rec.filename);
                            Segment::gap(&rec.filename, start, end, GapReason::MissingSorting)
                        }
                    }
                }
            };

            segments.push(segment);
            (segments, end)
        },
    );

    let total_spikes = segments.iter().filter(|s| !s.is_gap).map(|s| s.num_spikes).sum();

    SpikeTrain { total_spikes, total_duration_sec, segments }
}
