use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use spikecore::algorithm::matching::{compute_unit_matches, MatchOpts, MutualMatch};
use spikecore::algorithm::timeline::PairMatches;
use crate::error::{SessionError, SessionResult};
use crate::io::hashing::spike_labels_hash;
use crate::io::layout::{
    sorted_subdirs, SessionLayout, EVENT_MATCHES_X_TO_Y_FILE, EVENT_MATCHES_Y_TO_X_FILE,
    MATCH_INFO_FILE, MUTUAL_MATCHES_FILE,
};
use crate::io::npy::write_npy_i32;
use crate::sorting::load_events;

/// Provenance of a persisted pair result; used to skip recomputation when inputs are unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub recording_x: String,
    pub recording_y: String,
    pub n_neighbors: usize,
    pub spike_labels_hash_x: String,
    pub spike_labels_hash_y: String,
    pub num_mutual_matches: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub recording_x: String,
    pub recording_y: String,
    pub mutual_matches: Vec<MutualMatch>,
    /// False when an up-to-date persisted result was reused.
    pub recomputed: bool,
}

pub fn load_pair_matches(path: &Path) -> SessionResult<Vec<MutualMatch>> {
    let f = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(f)?)
}

pub fn save_pair_matches(path: &Path, matches: &[MutualMatch]) -> SessionResult<()> {
    let f = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(f, matches)?;
    Ok(())
}

fn load_match_info(pair_dir: &Path) -> Option<MatchInfo> {
    let f = File::open(pair_dir.join(MATCH_INFO_FILE)).ok()?;
    serde_json::from_reader(BufReader::new(f)).ok()
}

fn save_match_info(pair_dir: &Path, info: &MatchInfo) -> SessionResult<()> {
    let f = BufWriter::new(File::create(pair_dir.join(MATCH_INFO_FILE))?);
    serde_json::to_writer_pretty(f, info)?;
    Ok(())
}

fn labels_hash_or_missing(layout: &SessionLayout, bin: &str) -> SessionResult<String> {
    spike_labels_hash(&layout.spike_labels_path(bin))?
        .ok_or_else(|| SessionError::MissingSorting(bin.to_string()))
}

/// Match the units of `bin_x` against `bin_y` and persist the result under
/// `computed/unit_matching/<bin_x>/<bin_y>/`. Reuses the stored result when both label
/// files hash the same as when it was computed, unless `force` is set.
pub fn match_recordings(
    layout: &SessionLayout,
    bin_x: &str,
    bin_y: &str,
    opts: &MatchOpts,
    force: bool,
) -> SessionResult<MatchOutcome> {
    if bin_x == bin_y {
        return Err(SessionError::InvalidInput(format!("cannot match {} against itself", bin_x)));
    }

    let hash_x = labels_hash_or_missing(layout, bin_x)?;
    let hash_y = labels_hash_or_missing(layout, bin_y)?;
    let pair_dir = layout.pair_dir(bin_x, bin_y);
    let matches_path = pair_dir.join(MUTUAL_MATCHES_FILE);

    if !force {
        if let Some(info) = load_match_info(&pair_dir) {
            let fresh = info.spike_labels_hash_x == hash_x
                && info.spike_labels_hash_y == hash_y
                && info.n_neighbors == opts.n_neighbors;
            if fresh {
                match load_pair_matches(&matches_path) {
                    Ok(mutual_matches) => {
                        log::debug!("{} / {}: up to date, reusing stored matches", bin_x, bin_y);
                        return Ok(MatchOutcome {
                            recording_x: bin_x.to_string(),
                            recording_y: bin_y.to_string(),
                            mutual_matches,
                            recomputed: false,
                        });
                    }
                    Err(e) => log::warn!("{}: unreadable ({}), recomputing", matches_path.display(), e),
                }
            }
        }
    }

    let events_x = load_events(layout, bin_x)?;
    let events_y = load_events(layout, bin_y)?;
    let result = compute_unit_matches(&events_x, &events_y, opts)?;

    fs::create_dir_all(&pair_dir)?;
    save_pair_matches(&matches_path, &result.mutual_matches)?;
    write_npy_i32(&pair_dir.join(EVENT_MATCHES_X_TO_Y_FILE), &result.event_matches_x_to_y)?;
    write_npy_i32(&pair_dir.join(EVENT_MATCHES_Y_TO_X_FILE), &result.event_matches_y_to_x)?;
    save_match_info(&pair_dir, &MatchInfo {
        recording_x: bin_x.to_string(),
        recording_y: bin_y.to_string(),
        n_neighbors: opts.n_neighbors,
        spike_labels_hash_x: hash_x,
        spike_labels_hash_y: hash_y,
        num_mutual_matches: result.mutual_matches.len(),
    })?;

    log::info!(
        "{} / {}: {} mutual matches ({} vs {} events)",
        bin_x,
        bin_y,
        result.mutual_matches.len(),
        events_x.len(),
        events_y.len()
    );

    Ok(MatchOutcome {
        recording_x: bin_x.to_string(),
        recording_y: bin_y.to_string(),
        mutual_matches: result.mutual_matches,
        recomputed: true,
    })
}

/// Match every pair of chronologically adjacent recordings that both have sorting output.
/// A pair that fails is logged and left out.
pub fn match_all_consecutive(
    layout: &SessionLayout,
    opts: &MatchOpts,
    force: bool,
) -> SessionResult<Vec<MatchOutcome>> {
    let sorted: Vec<String> = layout
        .list_recordings()?
        .into_iter()
        .map(|r| r.filename)
        .filter(|f| layout.has_coarse_sorting(f))
        .collect();

    // pairs write to distinct directories
    let outcomes = sorted
        .par_windows(2)
        .filter_map(|pair| match match_recordings(layout, &pair[0], &pair[1], opts, force) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::warn!("skipping pair {} / {}: {}", pair[0], pair[1], e);
                None
            }
        })
        .collect();
    Ok(outcomes)
}

/// Every persisted pair result under `computed/unit_matching`, in directory-name order.
/// Files that cannot be read or parsed are skipped with a warning.
pub fn scan_pair_results(layout: &SessionLayout) -> SessionResult<Vec<PairMatches>> {
    let root = layout.unit_matching_dir();
    let mut out = Vec::new();
    for bin_x in sorted_subdirs(&root)? {
        for bin_y in sorted_subdirs(&root.join(&bin_x))? {
            let path = layout.pair_dir(&bin_x, &bin_y).join(MUTUAL_MATCHES_FILE);
            if !path.is_file() {
                continue;
            }
            match load_pair_matches(&path) {
                Ok(matches) => {
                    if let Some(bad) = matches.iter().find(|m| !m.is_valid()) {
                        log::warn!("skipping {}: invalid entry {:?}", path.display(), bad);
                        continue;
                    }
                    out.push(PairMatches { recording_x: bin_x.clone(), recording_y: bin_y, matches })
                }
                Err(e) => log::warn!("skipping {}: {}", path.display(), e),
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::npy::read_npy;
    use crate::sorting::test_utils::{write_raw, write_sorting};

    /// Two tight clusters on a line: label `a` near 0, label `b` near 100.
    fn two_clusters(layout: &SessionLayout, bin: &str, a: i32, b: i32) {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..12 {
            features.push(i as f32 * 0.1);
            labels.push(a);
            features.push(100.0 + i as f32 * 0.1);
            labels.push(b);
        }
        let times: Vec<f64> = (0..labels.len()).map(|i| i as f64 * 0.01).collect();
        write_sorting(layout, bin, &times, &labels, &features);
    }

    #[test]
    fn test_match_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        two_clusters(&layout, "a.bin", 1, 2);
        two_clusters(&layout, "b.bin", 5, 3);

        let out = match_recordings(&layout, "a.bin", "b.bin", &MatchOpts::default(), false).unwrap();
        assert!(out.recomputed);
        let pairs: Vec<(i32, i32)> = out.mutual_matches.iter().map(|m| (m.unit_x, m.unit_y)).collect();
        assert_eq!(pairs, vec![(1, 5), (2, 3)]);

        let pair_dir = layout.pair_dir("a.bin", "b.bin");
        assert_eq!(load_pair_matches(&pair_dir.join(MUTUAL_MATCHES_FILE)).unwrap(), out.mutual_matches);
        let ev = read_npy(&pair_dir.join(EVENT_MATCHES_X_TO_Y_FILE)).unwrap().into_i32_vec().unwrap();
        assert_eq!(ev.len(), 24);
        assert_eq!(&ev[..2], &[5, 3]);
    }

    #[test]
    fn test_unchanged_inputs_are_not_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        two_clusters(&layout, "a.bin", 1, 2);
        two_clusters(&layout, "b.bin", 1, 2);
        let opts = MatchOpts::default();

        assert!(match_recordings(&layout, "a.bin", "b.bin", &opts, false).unwrap().recomputed);
        let again = match_recordings(&layout, "a.bin", "b.bin", &opts, false).unwrap();
        assert!(!again.recomputed);
        assert_eq!(again.mutual_matches.len(), 2);

        assert!(match_recordings(&layout, "a.bin", "b.bin", &opts, true).unwrap().recomputed);
        assert!(match_recordings(&layout, "a.bin", "b.bin", &MatchOpts { n_neighbors: 5 }, false).unwrap().recomputed);

        two_clusters(&layout, "b.bin", 2, 1);
        let relabelled = match_recordings(&layout, "a.bin", "b.bin", &MatchOpts { n_neighbors: 5 }, false).unwrap();
        assert!(relabelled.recomputed);
        assert_eq!(relabelled.mutual_matches[0].unit_y, 2);
    }

    #[test]
    fn test_missing_sorting_and_self_match() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        two_clusters(&layout, "a.bin", 1, 2);
        let opts = MatchOpts::default();
        assert!(matches!(
            match_recordings(&layout, "a.bin", "zz.bin", &opts, false),
            Err(SessionError::MissingSorting(_))
        ));
        assert!(matches!(
            match_recordings(&layout, "a.bin", "a.bin", &opts, false),
            Err(SessionError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_scan_skips_malformed_results() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        two_clusters(&layout, "a.bin", 1, 2);
        two_clusters(&layout, "b.bin", 1, 2);
        match_recordings(&layout, "a.bin", "b.bin", &MatchOpts::default(), false).unwrap();

        let bad_dir = layout.pair_dir("b.bin", "c.bin");
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(bad_dir.join(MUTUAL_MATCHES_FILE), b"{not json").unwrap();
        fs::create_dir_all(layout.pair_dir("c.bin", "d.bin")).unwrap();

        // parses, but points unit 1 at the unassigned label
        let noise_dir = layout.pair_dir("a.bin", "e.bin");
        fs::create_dir_all(&noise_dir).unwrap();
        save_pair_matches(&noise_dir.join(MUTUAL_MATCHES_FILE), &[MutualMatch {
            unit_x: 1,
            unit_y: 0,
            score_x_to_y: 0.9,
            score_y_to_x: 0.9,
            overall_score: 0.9,
        }])
        .unwrap();

        let pairs = scan_pair_results(&layout).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].recording_x.as_str(), pairs[0].recording_y.as_str()), ("a.bin", "b.bin"));
        assert_eq!(pairs[0].matches.len(), 2);
    }

    #[test]
    fn test_match_all_consecutive_skips_unsorted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        for bin in ["a.bin", "b.bin", "c.bin"] {
            write_raw(&layout, bin, 2, 10);
        }
        two_clusters(&layout, "a.bin", 1, 2);
        two_clusters(&layout, "c.bin", 4, 6);

        let outcomes = match_all_consecutive(&layout, &MatchOpts::default(), false).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!((outcomes[0].recording_x.as_str(), outcomes[0].recording_y.as_str()), ("a.bin", "c.bin"));
        assert!(layout.pair_dir("a.bin", "c.bin").join(MUTUAL_MATCHES_FILE).is_file());
    }
}
