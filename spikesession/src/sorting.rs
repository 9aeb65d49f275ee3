use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use spikecore::algorithm::timeline::{SortingSource, SpikeTrainData};
use spikecore::data::events::LabeledEvents;
use crate::error::{SessionError, SessionResult};
use crate::io::hashing::spike_labels_hash;
use crate::io::layout::SessionLayout;
use crate::io::npy::read_npy;

/// Coarse sorting output of one recording: spike times (seconds) and labels.
#[derive(Clone, Debug, PartialEq)]
pub struct CoarseSorting {
    pub bin_filename: String,
    pub spike_times: Vec<f64>,
    pub spike_labels: Vec<i32>,
}

impl CoarseSorting {
    pub fn load(layout: &SessionLayout, bin: &str) -> SessionResult<Self> {
        let times_path = layout.spike_times_path(bin);
        let labels_path = layout.spike_labels_path(bin);
        if !times_path.is_file() || !labels_path.is_file() {
            return Err(SessionError::MissingSorting(bin.to_string()));
        }
        let spike_times = read_npy(&times_path)?.into_f64_vec();
        let spike_labels = read_npy(&labels_path)?.into_i32_vec()?;
        if spike_times.len() != spike_labels.len() {
            return Err(SessionError::InvalidInput(format!(
                "{}: {} spike times but {} labels",
                bin,
                spike_times.len(),
                spike_labels.len()
            )));
        }
        Ok(Self { bin_filename: bin.to_string(), spike_times, spike_labels })
    }
}

/// Per-event features (`spike_frames.npy`) and labels, the input of unit matching.
pub fn load_events(layout: &SessionLayout, bin: &str) -> SessionResult<LabeledEvents> {
    let frames_path = layout.spike_frames_path(bin);
    let labels_path = layout.spike_labels_path(bin);
    if !frames_path.is_file() || !labels_path.is_file() {
        return Err(SessionError::MissingSorting(bin.to_string()));
    }
    let features = read_npy(&frames_path)?.into_feature_matrix()?;
    let labels = read_npy(&labels_path)?.into_i32_vec()?;
    Ok(LabeledEvents::new(features, labels)?)
}

/// Reads sorting output from a session directory for the spike-train assembler.
#[derive(Clone, Debug)]
pub struct SessionSortingSource<'a> {
    layout: &'a SessionLayout,
}

impl<'a> SessionSortingSource<'a> {
    pub fn new(layout: &'a SessionLayout) -> Self {
        Self { layout }
    }
}

impl SortingSource for SessionSortingSource<'_> {
    fn load_spike_train(&self, filename: &str) -> Option<SpikeTrainData> {
        match CoarseSorting::load(self.layout, filename) {
            Ok(s) => Some(SpikeTrainData { times: s.spike_times, labels: s.spike_labels }),
            Err(e) => {
                log::warn!("skipping sorting of {}: {}", filename, e);
                None
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub unit_id: i32,
    pub num_spikes: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitsSummary {
    pub units: Vec<UnitInfo>,
    pub spike_labels_hash: Option<String>,
}

/// Every label present in a recording's sorting (unassigned included) with its spike count.
pub fn list_units(layout: &SessionLayout, bin: &str) -> SessionResult<UnitsSummary> {
    let labels_path = layout.spike_labels_path(bin);
    if !labels_path.is_file() {
        return Err(SessionError::MissingSorting(bin.to_string()));
    }
    let labels = read_npy(&labels_path)?.into_i32_vec()?;

    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for l in labels {
        *counts.entry(l).or_default() += 1;
    }
    let units = counts
        .into_iter()
        .map(|(unit_id, num_spikes)| UnitInfo { unit_id, num_spikes })
        .collect();

    Ok(UnitsSummary { units, spike_labels_hash: spike_labels_hash(&labels_path)? })
}
