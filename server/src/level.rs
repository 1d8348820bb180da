//! Level catalog and cached difference-index storage.
//!
//! Each published level persists two artifacts under the data directory:
//! a `catalog.json` entry (id, group count, difficulty, availability flag)
//! and a `<id>.idx` bincode blob holding the precomputed
//! [`DifferenceIndex`]. Both are loaded whole, mutated in memory, and
//! written back whole.

use crate::detector::{Detection, Difficulty};
use crate::error::GameError;
use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::Coord;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type LevelId = String;

const CATALOG_FILE: &str = "catalog.json";

/// Catalog entry for one published level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelMeta {
    pub id: LevelId,
    pub total_groups: usize,
    pub difficulty: Difficulty,
    pub available: bool,
}

/// Precomputed coordinate-to-group mapping, shared read-only by every
/// session playing the level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferenceIndex {
    groups: Vec<Vec<Coord>>,
    lookup: HashMap<Coord, usize>,
}

impl DifferenceIndex {
    pub fn from_detection(detection: &Detection) -> Self {
        Self {
            groups: detection.groups.clone(),
            lookup: detection.index.clone(),
        }
    }

    pub fn group_at(&self, coord: Coord) -> Option<usize> {
        self.lookup.get(&coord).copied()
    }

    pub fn total_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group_pixels(&self, group: usize) -> &[Coord] {
        &self.groups[group]
    }

    /// Flattened coordinates of the groups still unfound, in group order.
    pub fn remaining_coords(&self, remaining: &HashSet<usize>) -> Vec<Coord> {
        let mut coords = Vec::new();
        for (group_id, group) in self.groups.iter().enumerate() {
            if remaining.contains(&group_id) {
                coords.extend_from_slice(group);
            }
        }
        coords
    }
}

/// In-memory catalog backed by the level data directory.
pub struct LevelStore {
    dir: PathBuf,
    catalog: Vec<LevelMeta>,
    cache: HashMap<LevelId, Arc<DifferenceIndex>>,
}

impl LevelStore {
    /// Opens (or initializes) the level directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, GameError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let catalog_path = dir.join(CATALOG_FILE);
        let catalog = match fs::read(&catalog_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(GameError::Storage(err)),
        };

        Ok(Self {
            dir,
            catalog,
            cache: HashMap::new(),
        })
    }

    /// Persists a detection result under a freshly generated level id.
    ///
    /// Writes the index blob first so a catalog entry never points at a
    /// missing file.
    pub fn publish(&mut self, detection: &Detection) -> Result<LevelMeta, GameError> {
        let id = generate_level_id();
        let index = DifferenceIndex::from_detection(detection);

        let blob = bincode::serialize(&index)?;
        fs::write(self.index_path(&id), blob)?;

        let meta = LevelMeta {
            id: id.clone(),
            total_groups: index.total_groups(),
            difficulty: detection.difficulty,
            available: true,
        };
        self.catalog.push(meta.clone());
        if let Err(err) = self.persist_catalog() {
            self.catalog.pop();
            return Err(err);
        }

        self.cache.insert(id.clone(), Arc::new(index));
        info!(
            "Published level {} ({} groups, {:?})",
            id, meta.total_groups, meta.difficulty
        );
        Ok(meta)
    }

    /// Loads a level's difference index, rehydrating from disk on first use.
    pub fn index(&mut self, id: &str) -> Result<Arc<DifferenceIndex>, GameError> {
        if let Some(index) = self.cache.get(id) {
            return Ok(Arc::clone(index));
        }
        if self.meta(id).is_none() {
            return Err(GameError::LevelNotFound(id.to_string()));
        }

        let bytes = fs::read(self.index_path(id))?;
        let index: DifferenceIndex = bincode::deserialize(&bytes)?;
        let index = Arc::new(index);
        self.cache.insert(id.to_string(), Arc::clone(&index));
        Ok(index)
    }

    pub fn meta(&self, id: &str) -> Option<&LevelMeta> {
        self.catalog.iter().find(|meta| meta.id == id)
    }

    /// Flips a level's availability flag and persists the catalog. A write
    /// failure restores the previous flag.
    pub fn set_available(&mut self, id: &str, available: bool) -> Result<(), GameError> {
        let meta = self
            .catalog
            .iter_mut()
            .find(|meta| meta.id == id)
            .ok_or_else(|| GameError::LevelNotFound(id.to_string()))?;
        let previous = meta.available;
        meta.available = available;

        if let Err(err) = self.persist_catalog() {
            if let Some(meta) = self.catalog.iter_mut().find(|meta| meta.id == id) {
                meta.available = previous;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Random published level outside the given played set (limited mode).
    pub fn pick_unplayed(&self, played: &HashSet<LevelId>) -> Option<LevelMeta> {
        let candidates: Vec<&LevelMeta> = self
            .catalog
            .iter()
            .filter(|meta| !played.contains(&meta.id))
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .map(|meta| (*meta).clone())
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    fn index_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.idx", id))
    }

    fn persist_catalog(&self) -> Result<(), GameError> {
        let bytes = serde_json::to_vec_pretty(&self.catalog)?;
        fs::write(self.dir.join(CATALOG_FILE), bytes)?;
        Ok(())
    }
}

fn generate_level_id() -> LevelId {
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            char::from_digit(n as u32, 16).unwrap_or('0')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{detect, Image};

    fn sample_detection() -> Detection {
        let original = Image::new(20, 20);
        let mut modified = Image::new(20, 20);
        modified.set_pixel(2, 2, [255, 0, 0, 255]);
        modified.set_pixel(10, 10, [255, 0, 0, 255]);
        detect(&original, &modified, 0).unwrap()
    }

    #[test]
    fn test_publish_and_rehydrate() {
        let dir = tempfile::tempdir().unwrap();
        let meta = {
            let mut store = LevelStore::open(dir.path()).unwrap();
            store.publish(&sample_detection()).unwrap()
        };
        assert_eq!(meta.total_groups, 2);
        assert!(meta.available);

        // Fresh store: catalog and index come back from disk, no detection.
        let mut reopened = LevelStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        let index = reopened.index(&meta.id).unwrap();
        assert_eq!(index.total_groups(), 2);
        assert_eq!(index.group_at(Coord::new(2, 2)), Some(0));
        assert_eq!(index.group_at(Coord::new(3, 3)), None);
    }

    #[test]
    fn test_unknown_level_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LevelStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.index("missing"),
            Err(GameError::LevelNotFound(_))
        ));
        assert!(matches!(
            store.set_available("missing", false),
            Err(GameError::LevelNotFound(_))
        ));
    }

    #[test]
    fn test_availability_flag_persists() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mut store = LevelStore::open(dir.path()).unwrap();
            let meta = store.publish(&sample_detection()).unwrap();
            store.set_available(&meta.id, false).unwrap();
            meta.id
        };

        let reopened = LevelStore::open(dir.path()).unwrap();
        assert!(!reopened.meta(&id).unwrap().available);
    }

    #[test]
    fn test_failed_catalog_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("levels");
        let mut store = LevelStore::open(&nested).unwrap();
        let meta = store.publish(&sample_detection()).unwrap();

        // With the data directory gone every write fails; the in-memory
        // catalog must stay as loaded.
        fs::remove_dir_all(&nested).unwrap();
        assert!(store.set_available(&meta.id, false).is_err());
        assert!(store.meta(&meta.id).unwrap().available);

        assert!(store.publish(&sample_detection()).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_pick_unplayed_excludes_played() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LevelStore::open(dir.path()).unwrap();
        let first = store.publish(&sample_detection()).unwrap();
        let second = store.publish(&sample_detection()).unwrap();

        let mut played = HashSet::new();
        played.insert(first.id.clone());

        let pick = store.pick_unplayed(&played).unwrap();
        assert_eq!(pick.id, second.id);

        played.insert(second.id);
        assert!(store.pick_unplayed(&played).is_none());
    }

    #[test]
    fn test_remaining_coords_skips_found_groups() {
        let detection = sample_detection();
        let index = DifferenceIndex::from_detection(&detection);

        let mut remaining: HashSet<usize> = [0, 1].into_iter().collect();
        assert_eq!(index.remaining_coords(&remaining).len(), 2);

        remaining.remove(&0);
        let coords = index.remaining_coords(&remaining);
        assert_eq!(coords, vec![Coord::new(10, 10)]);
    }
}
