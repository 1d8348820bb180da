//! Click validation and end-condition rules.

use crate::level::DifferenceIndex;
use crate::session::Session;
use shared::{ConnId, Coord, GameMode};

/// What a click turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Coordinate outside every group, or inside an already-found group.
    NotADifference,
    /// A fresh find; carries the full pixel set for highlighting.
    Found { group: usize, pixels: Vec<Coord> },
}

/// How a classic session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndState {
    SoloComplete { winner: ConnId },
    DuoMajority { winner: ConnId },
}

/// Validates a click against the session's difference index.
///
/// Re-clicking a found group is an idempotent no-op: the remaining set is
/// untouched and no score changes.
pub fn validate_click(
    session: &mut Session,
    index: &DifferenceIndex,
    coord: Coord,
    conn: ConnId,
) -> ClickOutcome {
    let Some(group) = index.group_at(coord) else {
        return ClickOutcome::NotADifference;
    };
    if !session.remaining.remove(&group) {
        return ClickOutcome::NotADifference;
    }

    if let Some(player) = session.player_mut(conn) {
        player.found += 1;
    }

    ClickOutcome::Found {
        group,
        pixels: index.group_pixels(group).to_vec(),
    }
}

/// Checks the classic end conditions.
///
/// Classic-solo ends on full completion. Classic-duo ends the moment either
/// player reaches the majority target, even with groups unfound. Limited
/// sessions never end here; their life is bounded by the clock and the
/// level catalog.
pub fn end_condition(session: &Session) -> Option<EndState> {
    match session.mode {
        GameMode::ClassicSolo => {
            let player = session.players.first()?;
            if player.found as usize == session.total_groups {
                Some(EndState::SoloComplete {
                    winner: player.conn,
                })
            } else {
                None
            }
        }
        GameMode::ClassicDuo => {
            let target = session.majority_target();
            session
                .players
                .iter()
                .find(|p| p.found >= target)
                .map(|p| EndState::DuoMajority { winner: p.conn })
        }
        GameMode::LimitedSolo | GameMode::LimitedDuo => None,
    }
}
