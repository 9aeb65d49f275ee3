//! Focus units: user-chosen anchors, persisted in `focus_units.json`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use spikecore::algorithm::timeline::{Anchor, MatchIndex, UnitLink};
use crate::error::{SessionError, SessionResult};
use crate::io::hashing::spike_labels_hash;
use crate::io::layout::SessionLayout;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FocusUnit {
    pub focus_unit_id: String,
    pub bin_filename: String,
    pub unit_id: i32,
    #[serde(default)]
    pub notes: String,
    /// Labels hash at creation time.
    #[serde(default)]
    pub spike_labels_hash: Option<String>,
}

impl FocusUnit {
    pub fn anchor(&self) -> Anchor {
        Anchor { bin_filename: self.bin_filename.clone(), unit_id: self.unit_id }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FocusUnitsFile {
    #[serde(default)]
    pub focus_units: Vec<FocusUnit>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewFocusUnit {
    pub bin_filename: String,
    pub unit_id: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FocusUnitWithMatches {
    #[serde(flatten)]
    pub focus_unit: FocusUnit,
    pub mutual_matches: Vec<UnitLink>,
}

/// Next free id, `F` + (largest numeric suffix + 1), zero padded to three digits.
pub fn next_focus_unit_id(existing: &[FocusUnit]) -> String {
    let max = existing
        .iter()
        .filter_map(|u| u.focus_unit_id.strip_prefix('F'))
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("F{:03}", max + 1)
}

/// Read-modify-write access to `focus_units.json`. Writers are not synchronised.
#[derive(Clone, Debug)]
pub struct FocusUnitStore {
    path: PathBuf,
    data: FocusUnitsFile,
}

impl FocusUnitStore {
    /// A missing or corrupt file opens as an empty store.
    pub fn open(layout: &SessionLayout) -> SessionResult<Self> {
        let path = layout.focus_units_path();
        if !path.is_file() {
            return Ok(Self { path, data: FocusUnitsFile::default() });
        }
        let reader = BufReader::new(File::open(&path)?);
        let data = match serde_json::from_reader(reader) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("{} is corrupt ({}), starting empty", path.display(), e);
                FocusUnitsFile::default()
            }
        };
        Ok(Self { path, data })
    }

    pub fn units(&self) -> &[FocusUnit] {
        &self.data.focus_units
    }

    pub fn get(&self, focus_unit_id: &str) -> Option<&FocusUnit> {
        self.data.focus_units.iter().find(|u| u.focus_unit_id == focus_unit_id)
    }

    pub fn save(&self) -> SessionResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let f = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(f, &self.data)?;
        Ok(())
    }

    /// Add units in one batch. Every unit must refer to a recording with coarse sorting;
    /// if any does not, nothing is added.
    pub fn add(&mut self, layout: &SessionLayout, units: &[NewFocusUnit]) -> SessionResult<Vec<FocusUnit>> {
        if units.is_empty() {
            return Err(SessionError::InvalidInput("'units' must be a non-empty array".to_string()));
        }

        let mut hashes = Vec::with_capacity(units.len());
        for u in units {
            if u.bin_filename.is_empty() {
                return Err(SessionError::InvalidInput("each unit needs a bin_filename".to_string()));
            }
            let hash = spike_labels_hash(&layout.spike_labels_path(&u.bin_filename))?
                .ok_or_else(|| SessionError::MissingSorting(u.bin_filename.clone()))?;
            hashes.push(hash);
        }

        let mut added = Vec::with_capacity(units.len());
        for (u, hash) in units.iter().zip(hashes) {
            let unit = FocusUnit {
                focus_unit_id: next_focus_unit_id(&self.data.focus_units),
                bin_filename: u.bin_filename.clone(),
                unit_id: u.unit_id,
                notes: String::new(),
                spike_labels_hash: Some(hash),
            };
            self.data.focus_units.push(unit.clone());
            added.push(unit);
        }

        self.save()?;
        Ok(added)
    }

    pub fn update_notes(&mut self, focus_unit_id: &str, notes: &str) -> SessionResult<()> {
        let unit = self
            .data
            .focus_units
            .iter_mut()
            .find(|u| u.focus_unit_id == focus_unit_id)
            .ok_or_else(|| SessionError::FocusUnitNotFound(focus_unit_id.to_string()))?;
        unit.notes = notes.to_string();
        self.save()
    }

    pub fn delete(&mut self, focus_unit_id: &str) -> SessionResult<()> {
        let before = self.data.focus_units.len();
        self.data.focus_units.retain(|u| u.focus_unit_id != focus_unit_id);
        if self.data.focus_units.len() == before {
            return Err(SessionError::FocusUnitNotFound(focus_unit_id.to_string()));
        }
        self.save()
    }

    /// Each focus unit with every mutual match touching it.
    pub fn list_with_matches(&self, index: &MatchIndex) -> Vec<FocusUnitWithMatches> {
        self.data
            .focus_units
            .iter()
            .map(|u| FocusUnitWithMatches {
                focus_unit: u.clone(),
                mutual_matches: index.links_for(&u.bin_filename, u.unit_id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikecore::algorithm::matching::MutualMatch;
    use spikecore::algorithm::timeline::PairMatches;
    use crate::sorting::test_utils::write_sorting;

    fn new_unit(bin: &str, unit_id: i32) -> NewFocusUnit {
        NewFocusUnit { bin_filename: bin.to_string(), unit_id }
    }

    fn session() -> (tempfile::TempDir, SessionLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        write_sorting(&layout, "a.bin", &[0.0, 1.0], &[1, 2], &[0.0, 1.0]);
        (dir, layout)
    }

    #[test]
    fn test_next_focus_unit_id() {
        assert_eq!(next_focus_unit_id(&[]), "F001");
        let units: Vec<FocusUnit> = ["F002", "X9", "F010", "Fabc"]
            .iter()
            .map(|id| FocusUnit {
                focus_unit_id: id.to_string(),
                bin_filename: "a.bin".to_string(),
                unit_id: 1,
                notes: String::new(),
                spike_labels_hash: None,
            })
            .collect();
        assert_eq!(next_focus_unit_id(&units), "F011");
    }

    #[test]
    fn test_add_update_delete_roundtrip() {
        let (_dir, layout) = session();
        let mut store = FocusUnitStore::open(&layout).unwrap();
        assert!(store.units().is_empty());

        let added = store.add(&layout, &[new_unit("a.bin", 1), new_unit("a.bin", 2)]).unwrap();
        assert_eq!(added[0].focus_unit_id, "F001");
        assert_eq!(added[1].focus_unit_id, "F002");
        assert!(added[0].spike_labels_hash.is_some());

        store.update_notes("F002", "stable over a week").unwrap();
        store.delete("F001").unwrap();

        let reopened = FocusUnitStore::open(&layout).unwrap();
        assert_eq!(reopened.units().len(), 1);
        assert_eq!(reopened.get("F002").unwrap().notes, "stable over a week");

        let mut store = reopened;
        let added = store.add(&layout, &[new_unit("a.bin", 1)]).unwrap();
        assert_eq!(added[0].focus_unit_id, "F003");
    }

    #[test]
    fn test_unknown_ids() {
        let (_dir, layout) = session();
        let mut store = FocusUnitStore::open(&layout).unwrap();
        assert!(matches!(store.update_notes("F404", "x"), Err(SessionError::FocusUnitNotFound(_))));
        assert!(matches!(store.delete("F404"), Err(SessionError::FocusUnitNotFound(_))));
    }

    #[test]
    fn test_add_without_sorting_adds_nothing() {
        let (_dir, layout) = session();
        let mut store = FocusUnitStore::open(&layout).unwrap();
        let err = store.add(&layout, &[new_unit("a.bin", 1), new_unit("b.bin", 1)]).unwrap_err();
        assert!(matches!(err, SessionError::MissingSorting(_)));
        assert!(store.units().is_empty());
        assert!(!layout.focus_units_path().exists());
        assert!(matches!(store.add(&layout, &[]), Err(SessionError::InvalidInput(_))));
    }

    #[test]
    fn test_corrupt_store_opens_empty() {
        let (_dir, layout) = session();
        fs::write(layout.focus_units_path(), b"[[[").unwrap();
        assert!(FocusUnitStore::open(&layout).unwrap().units().is_empty());
    }

    #[test]
    fn test_list_with_matches() {
        let (_dir, layout) = session();
        let mut store = FocusUnitStore::open(&layout).unwrap();
        store.add(&layout, &[new_unit("a.bin", 1)]).unwrap();

        let index = MatchIndex::build(&[PairMatches {
            recording_x: "z.bin".to_string(),
            recording_y: "a.bin".to_string(),
            matches: vec![MutualMatch { unit_x: 4, unit_y: 1, score_x_to_y: 1.0, score_y_to_x: 0.5, overall_score: 0.75 }],
        }]);
        let listed = store.list_with_matches(&index);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].mutual_matches, vec![UnitLink {
            bin_filename: "z.bin".to_string(),
            unit_id: 4,
            overall_score: 0.75,
        }]);

        let v = serde_json::to_value(&listed[0]).unwrap();
        assert_eq!(v["focus_unit_id"], "F001");
        assert_eq!(v["mutual_matches"][0]["unit_id"], 4);
    }
}
