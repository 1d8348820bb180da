//! Per-room game state and the session store.
//!
//! A [`Session`] owns everything one room needs between start and teardown:
//! the players, the shrinking set of unfound groups, the clock, a snapshot
//! of the game constants taken at creation, and the handle of the periodic
//! tick task. The timer is cancelled exactly once, on the single teardown
//! path in the lobby.

use crate::level::LevelId;
use shared::{ConnId, GameConstants, GameMode, RoomId};
use std::collections::{HashMap, HashSet};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct PlayerSlot {
    pub conn: ConnId,
    pub name: String,
    pub found: u32,
}

#[derive(Debug)]
pub struct Session {
    pub room_id: RoomId,
    pub mode: GameMode,
    pub level_id: LevelId,
    pub players: Vec<PlayerSlot>,
    /// Group indices not yet found. Only ever shrinks within one level.
    pub remaining: HashSet<usize>,
    pub total_groups: usize,
    /// Counts up in classic modes, down in limited modes.
    pub clock: u32,
    /// Constants snapshot taken at creation; immune to later changes.
    pub constants: GameConstants,
    /// Levels already cycled through (limited modes).
    pub played_levels: HashSet<LevelId>,
    pub started_at_ms: u64,
    timer: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        room_id: RoomId,
        mode: GameMode,
        level_id: LevelId,
        total_groups: usize,
        constants: GameConstants,
        started_at_ms: u64,
    ) -> Self {
        let clock = if mode.is_limited() {
            constants.initial_time
        } else {
            0
        };
        let mut played_levels = HashSet::new();
        played_levels.insert(level_id.clone());

        Self {
            room_id,
            mode,
            level_id,
            players: Vec::new(),
            remaining: (0..total_groups).collect(),
            total_groups,
            clock,
            constants,
            played_levels,
            started_at_ms,
            timer: None,
        }
    }

    pub fn add_player(&mut self, conn: ConnId, name: String) {
        self.players.push(PlayerSlot {
            conn,
            name,
            found: 0,
        });
    }

    pub fn player(&self, conn: ConnId) -> Option<&PlayerSlot> {
        self.players.iter().find(|p| p.conn == conn)
    }

    pub fn player_mut(&mut self, conn: ConnId) -> Option<&mut PlayerSlot> {
        self.players.iter_mut().find(|p| p.conn == conn)
    }

    pub fn player_names(&self) -> Vec<String> {
        self.players.iter().map(|p| p.name.clone()).collect()
    }

    /// Found-count a classic-duo player needs to win: ceil(total / 2).
    pub fn majority_target(&self) -> u32 {
        ((self.total_groups + 1) / 2) as u32
    }

    pub fn attach_timer(&mut self, handle: JoinHandle<()>) {
        self.timer = Some(handle);
    }

    /// Aborts the periodic tick task. Safe to call once the session leaves
    /// the store; the `Option` keeps a double cancel inert.
    pub fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// One-second tick. Returns the new clock value.
    pub fn tick_clock(&mut self) -> u32 {
        if self.mode.is_limited() {
            self.clock = self.clock.saturating_sub(1);
        } else {
            self.clock += 1;
        }
        self.clock
    }

    /// Limited-mode credit for a found group, clamped to the initial time.
    pub fn credit_time(&mut self) -> u32 {
        self.clock = (self.clock + self.constants.bonus_time).min(self.constants.initial_time);
        self.clock
    }

    /// Applies the hint cost: added in classic, subtracted in limited.
    pub fn hint_cost(&mut self) -> u32 {
        if self.mode.is_limited() {
            self.clock = self.clock.saturating_sub(self.constants.penalty_time);
        } else {
            self.clock += self.constants.penalty_time;
        }
        self.clock
    }

    /// Switches a limited session to a fresh level with a full group set.
    pub fn advance_level(&mut self, level_id: LevelId, total_groups: usize) {
        self.level_id = level_id.clone();
        self.played_levels.insert(level_id);
        self.total_groups = total_groups;
        self.remaining = (0..total_groups).collect();
    }
}

/// All live rooms, keyed by room id.
pub struct SessionStore {
    rooms: HashMap<RoomId, Session>,
    next_room_id: RoomId,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            next_room_id: 1,
        }
    }

    /// Allocates a room id and inserts a fresh session under it.
    pub fn create(
        &mut self,
        mode: GameMode,
        level_id: LevelId,
        total_groups: usize,
        constants: GameConstants,
        started_at_ms: u64,
    ) -> RoomId {
        let room_id = self.next_room_id;
        self.next_room_id += 1;
        self.rooms.insert(
            room_id,
            Session::new(
                room_id,
                mode,
                level_id,
                total_groups,
                constants,
                started_at_ms,
            ),
        );
        room_id
    }

    pub fn get(&self, room_id: RoomId) -> Option<&Session> {
        self.rooms.get(&room_id)
    }

    pub fn get_mut(&mut self, room_id: RoomId) -> Option<&mut Session> {
        self.rooms.get_mut(&room_id)
    }

    pub fn remove(&mut self, room_id: RoomId) -> Option<Session> {
        self.rooms.remove(&room_id)
    }

    /// Room the connection currently plays in, if any.
    pub fn room_of(&self, conn: ConnId) -> Option<RoomId> {
        self.rooms
            .values()
            .find(|session| session.players.iter().any(|p| p.conn == conn))
            .map(|session| session.room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(mode: GameMode, total: usize) -> Session {
        Session::new(1, mode, "level".to_string(), total, GameConstants::default(), 0)
    }

    #[test]
    fn test_classic_clock_counts_up() {
        let mut session = session_with(GameMode::ClassicSolo, 3);
        assert_eq!(session.clock, 0);
        assert_eq!(session.tick_clock(), 1);
        assert_eq!(session.tick_clock(), 2);
    }

    #[test]
    fn test_limited_clock_counts_down_and_floors_at_zero() {
        let mut session = session_with(GameMode::LimitedSolo, 3);
        assert_eq!(session.clock, 120);
        session.clock = 1;
        assert_eq!(session.tick_clock(), 0);
        assert_eq!(session.tick_clock(), 0);
    }

    #[test]
    fn test_bonus_clamps_to_initial_time() {
        // clock=119 with bonus 5 must yield exactly 120, never higher.
        let mut session = session_with(GameMode::LimitedDuo, 3);
        session.clock = 119;
        assert_eq!(session.credit_time(), 120);
    }

    #[test]
    fn test_hint_cost_by_mode() {
        let mut classic = session_with(GameMode::ClassicSolo, 3);
        assert_eq!(classic.hint_cost(), 10);

        let mut limited = session_with(GameMode::LimitedSolo, 3);
        assert_eq!(limited.hint_cost(), 110);
        limited.clock = 4;
        assert_eq!(limited.hint_cost(), 0);
    }

    #[test]
    fn test_majority_target_is_ceil_half() {
        assert_eq!(session_with(GameMode::ClassicDuo, 5).majority_target(), 3);
        assert_eq!(session_with(GameMode::ClassicDuo, 6).majority_target(), 3);
        assert_eq!(session_with(GameMode::ClassicDuo, 1).majority_target(), 1);
    }

    #[test]
    fn test_advance_level_resets_groups_and_tracks_played() {
        let mut session = session_with(GameMode::LimitedSolo, 2);
        session.remaining.remove(&0);

        session.advance_level("next".to_string(), 4);
        assert_eq!(session.level_id, "next");
        assert_eq!(session.remaining.len(), 4);
        assert!(session.played_levels.contains("level"));
        assert!(session.played_levels.contains("next"));
    }

    #[tokio::test]
    async fn test_cancel_timer_is_idempotent() {
        let mut session = session_with(GameMode::ClassicSolo, 1);
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        session.attach_timer(handle);
        assert!(session.has_timer());

        session.cancel_timer();
        assert!(!session.has_timer());
        session.cancel_timer();
    }

    #[test]
    fn test_store_allocates_sequential_rooms_and_finds_members() {
        let mut store = SessionStore::new();
        let first = store.create(
            GameMode::ClassicSolo,
            "a".to_string(),
            2,
            GameConstants::default(),
            0,
        );
        let second = store.create(
            GameMode::ClassicDuo,
            "b".to_string(),
            2,
            GameConstants::default(),
            0,
        );
        assert_ne!(first, second);

        store.get_mut(first).unwrap().add_player(11, "ana".to_string());
        assert_eq!(store.room_of(11), Some(first));
        assert_eq!(store.room_of(99), None);

        let removed = store.remove(first).unwrap();
        assert_eq!(removed.room_id, first);
        assert_eq!(store.room_of(11), None);
    }
}
