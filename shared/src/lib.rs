//! Protocol types shared between the game server and its clients.
//!
//! Defines the bidirectional event vocabulary for the spot-the-difference
//! game: inbound [`ClientEvent`]s, outbound [`ServerEvent`]s, and the data
//! types they carry. The serde rename on every variant is the wire-name
//! compatibility contract with existing clients.

use serde::{Deserialize, Serialize};

/// Connection identifier assigned by the event gateway.
pub type ConnId = u64;

/// Room identifier assigned by the session store.
pub type RoomId = u32;

/// One pixel position on the level canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// The four playable game modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    #[serde(rename = "classic-solo")]
    ClassicSolo,
    #[serde(rename = "classic-duo")]
    ClassicDuo,
    #[serde(rename = "limited-solo")]
    LimitedSolo,
    #[serde(rename = "limited-duo")]
    LimitedDuo,
}

impl GameMode {
    pub fn is_duo(self) -> bool {
        matches!(self, GameMode::ClassicDuo | GameMode::LimitedDuo)
    }

    pub fn is_limited(self) -> bool {
        matches!(self, GameMode::LimitedSolo | GameMode::LimitedDuo)
    }

    pub fn party_size(self) -> u8 {
        if self.is_duo() {
            2
        } else {
            1
        }
    }
}

/// Process-wide timing knobs, in seconds.
///
/// Sessions snapshot the latest value at creation; later changes only affect
/// sessions created afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConstants {
    /// Starting value of the limited-mode countdown; also its upper clamp.
    pub initial_time: u32,
    /// Seconds credited per found group in limited mode.
    pub bonus_time: u32,
    /// Seconds a hint costs (added in classic, subtracted in limited).
    pub penalty_time: u32,
}

impl Default for GameConstants {
    fn default() -> Self {
        Self {
            initial_time: 120,
            bonus_time: 5,
            penalty_time: 10,
        }
    }
}

/// Completion time submitted for leaderboard ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionStats {
    pub level_id: String,
    pub party_size: u8,
    pub player_name: String,
    pub minutes: u8,
    pub seconds: u8,
}

/// One append-only record of a finished (or failed) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub start_time_ms: u64,
    pub duration_secs: u64,
    pub mode: GameMode,
    pub players: Vec<String>,
    pub quitter: Option<String>,
    pub winner: Option<String>,
}

/// Snapshot sent alongside `session-started`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub started_at_ms: u64,
    pub total_groups: usize,
    pub constants: GameConstants,
}

/// Events a client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientEvent {
    #[serde(rename = "create-room")]
    CreateRoom {
        level_id: Option<String>,
        mode: GameMode,
        player_name: String,
    },
    #[serde(rename = "join-room")]
    JoinRoom { level_id: String, player_name: String },
    #[serde(rename = "accept-partner")]
    AcceptPartner,
    #[serde(rename = "reject-partner")]
    RejectPartner,
    #[serde(rename = "cancel-room")]
    CancelRoom,
    #[serde(rename = "cancel-join")]
    CancelJoin,
    #[serde(rename = "request-coop")]
    RequestCoop { player_name: String },
    #[serde(rename = "leave-coop")]
    LeaveCoop,
    #[serde(rename = "click")]
    Click {
        coords: Coord,
        level_id: String,
        room_id: RoomId,
    },
    #[serde(rename = "use-hint")]
    UseHint { room_id: RoomId },
    #[serde(rename = "close-room")]
    CloseRoom { room_id: RoomId, abandoned: bool },
    #[serde(rename = "set-constants")]
    SetConstants { constants: GameConstants },
    #[serde(rename = "get-constants")]
    GetConstants,
    #[serde(rename = "record-completion")]
    RecordCompletion { stats: CompletionStats },
    #[serde(rename = "get-history")]
    GetHistory,
    #[serde(rename = "reset-history")]
    ResetHistory,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    #[serde(rename = "room-id-assigned")]
    RoomIdAssigned { id: RoomId },
    #[serde(rename = "partner-candidate")]
    PartnerCandidate { name: String },
    #[serde(rename = "partner-rejected")]
    PartnerRejected,
    #[serde(rename = "join-cancelled")]
    JoinCancelled,
    #[serde(rename = "room-no-longer-exists")]
    RoomNoLongerExists,
    #[serde(rename = "names-assigned")]
    NamesAssigned { p1: String, p2: String },
    #[serde(rename = "session-started")]
    SessionStarted {
        room_id: RoomId,
        remaining_coords: Vec<Coord>,
        mode: GameMode,
        stats: SessionStats,
    },
    #[serde(rename = "click-result")]
    ClickResult {
        is_difference: bool,
        pixels: Vec<Coord>,
        remaining_coords: Vec<Coord>,
        player_id: ConnId,
    },
    #[serde(rename = "clock")]
    Clock { value: u32 },
    #[serde(rename = "session-ended")]
    SessionEnded {
        winner_id: Option<ConnId>,
        winner_name: Option<String>,
    },
    #[serde(rename = "limited-round-advance")]
    LimitedRoundAdvance {
        level: String,
        remaining_coords: Vec<Coord>,
    },
    #[serde(rename = "limited-session-ended")]
    LimitedSessionEnded { won: bool },
    #[serde(rename = "partner-left")]
    PartnerLeft,
    #[serde(rename = "new-record")]
    NewRecord { rank: u8, ordinal: String },
    #[serde(rename = "constants-changed")]
    ConstantsChanged { constants: GameConstants },
    #[serde(rename = "history-appended")]
    HistoryAppended { records: Vec<HistoryRecord> },
    #[serde(rename = "history-reset")]
    HistoryReset,
}

/// Transport frame wrapping client traffic with connection management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
    /// First frame a client sends; opens the logical connection.
    Hello,
    /// Regular game traffic.
    Event(ClientEvent),
    /// Explicit disconnect.
    Bye,
}
