//! Fixed-size leaderboard ranking of completion times.
//!
//! Every `(level, party size)` pair has exactly three slots, pre-seeded with
//! sentinel entries and kept in ascending (minutes, seconds) order. The
//! whole store persists as one JSON file, rewritten after each accepted
//! insertion.

use crate::error::GameError;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SLOT_COUNT: usize = 3;
const SENTINEL_NAME: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player: String,
    pub minutes: u8,
    pub seconds: u8,
}

impl LeaderboardEntry {
    fn sentinel() -> Self {
        Self {
            player: SENTINEL_NAME.to_string(),
            minutes: 59,
            seconds: 59,
        }
    }

    fn time(&self) -> (u8, u8) {
        (self.minutes, self.seconds)
    }
}

/// One ranked top-3 list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    fn seeded() -> Self {
        Self {
            entries: vec![LeaderboardEntry::sentinel(); SLOT_COUNT],
        }
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    /// Tries to rank a candidate time. Returns the zero-based rank it was
    /// inserted at, or `None` when no slot was beaten.
    ///
    /// A strictly faster candidate shifts the beaten slot and everything
    /// below it, dropping the old third place. A candidate equal to a slot
    /// only shifts when the immediately following slot differs; among
    /// adjacent equal times nothing moves.
    pub fn submit(&mut self, player: &str, minutes: u8, seconds: u8) -> Option<usize> {
        let candidate = (minutes, seconds);

        for rank in 0..SLOT_COUNT {
            let slot = self.entries[rank].time();
            let beats = candidate < slot
                || (candidate == slot
                    && self
                        .entries
                        .get(rank + 1)
                        .map_or(false, |next| next.time() != candidate));
            if beats {
                self.entries.insert(
                    rank,
                    LeaderboardEntry {
                        player: player.to_string(),
                        minutes,
                        seconds,
                    },
                );
                self.entries.truncate(SLOT_COUNT);
                return Some(rank);
            }
        }
        None
    }
}

/// English ordinal label for a zero-based rank.
pub fn ordinal(rank: usize) -> String {
    match rank {
        0 => "1st".to_string(),
        1 => "2nd".to_string(),
        2 => "3rd".to_string(),
        n => format!("{}th", n + 1),
    }
}

/// File-backed collection of leaderboards keyed by level and party size.
pub struct LeaderboardStore {
    path: PathBuf,
    boards: HashMap<String, Leaderboard>,
}

impl LeaderboardStore {
    /// Opens the store; a missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GameError> {
        let path = path.as_ref().to_path_buf();
        let boards = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(GameError::Storage(err)),
        };
        Ok(Self { path, boards })
    }

    /// Ranks a completion, lazily creating the board with sentinel entries.
    ///
    /// Persists the whole store on an accepted insertion; a write failure
    /// rejects the operation, leaving both the file and the in-memory board
    /// as loaded.
    pub fn record(
        &mut self,
        level_id: &str,
        party_size: u8,
        player: &str,
        minutes: u8,
        seconds: u8,
    ) -> Result<Option<usize>, GameError> {
        let key = board_key(level_id, party_size);
        let mut board = self
            .boards
            .get(&key)
            .cloned()
            .unwrap_or_else(Leaderboard::seeded);

        let Some(rank) = board.submit(player, minutes, seconds) else {
            return Ok(None);
        };

        // The insertion only commits once the write lands on disk.
        let previous = self.boards.insert(key.clone(), board);
        if let Err(err) = self.persist() {
            match previous {
                Some(board) => self.boards.insert(key, board),
                None => self.boards.remove(&key),
            };
            return Err(err);
        }
        info!(
            "New {} record on level {} ({}p): {} at {:02}:{:02}",
            ordinal(rank),
            level_id,
            party_size,
            player,
            minutes,
            seconds
        );
        Ok(Some(rank))
    }

    pub fn board(&self, level_id: &str, party_size: u8) -> Option<&Leaderboard> {
        self.boards.get(&board_key(level_id, party_size))
    }

    fn persist(&self) -> Result<(), GameError> {
        let bytes = serde_json::to_vec_pretty(&self.boards)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

fn board_key(level_id: &str, party_size: u8) -> String {
    format!("{}:{}", level_id, party_size)
}
