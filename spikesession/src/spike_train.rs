use serde::{Deserialize, Serialize};

use spikecore::algorithm::timeline::{assemble_spike_train, MatchIndex, Recording, Segment};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::focus::FocusUnitStore;
use crate::io::layout::SessionLayout;
use crate::sorting::SessionSortingSource;
use crate::unit_matching::scan_pair_results;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FocusSpikeTrain {
    pub focus_unit_id: String,
    pub total_spikes: usize,
    pub total_duration_sec: f64,
    pub segments: Vec<Segment>,
}

/// Recordings of the session with durations derived from their raw byte size.
pub fn session_recordings(layout: &SessionLayout, config: &SessionConfig) -> SessionResult<Vec<Recording>> {
    let geometry = config.geometry();
    Ok(layout
        .list_recordings()?
        .into_iter()
        .map(|f| Recording::from_byte_size(f.filename, f.num_bytes, &geometry))
        .collect())
}

/// Spike train of a stored focus unit across every recording of the session.
pub fn spike_train_for_focus_unit(layout: &SessionLayout, focus_unit_id: &str) -> SessionResult<FocusSpikeTrain> {
    let store = FocusUnitStore::open(layout)?;
    let focus_unit = store
        .get(focus_unit_id)
        .ok_or_else(|| SessionError::FocusUnitNotFound(focus_unit_id.to_string()))?;

    let config = SessionConfig::load(&layout.config_path())?;
    let recordings = session_recordings(layout, &config)?;
    let pairs = scan_pair_results(layout)?;
    let index = MatchIndex::build(&pairs);

    let train = assemble_spike_train(&focus_unit.anchor(), &recordings, &index, &SessionSortingSource::new(layout));

    log::debug!(
        "{}: {} spikes over {:.1} s in {} segments",
        focus_unit_id,
        train.total_spikes,
        train.total_duration_sec,
        train.segments.len()
    );

    Ok(FocusSpikeTrain {
        focus_unit_id: focus_unit_id.to_string(),
        total_spikes: train.total_spikes,
        total_duration_sec: train.total_duration_sec,
        segments: train.segments,
    })
}
