//! Matchmaking queues: classic-duo level reservations and the anonymous
//! limited-coop pairing slot.
//!
//! All queue state lives in one registry mutated only by the lobby's event
//! loop, which gives the atomicity the join/cancel/accept flows rely on.

use crate::level::LevelId;
use shared::ConnId;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub conn: ConnId,
    pub name: String,
}

#[derive(Debug)]
struct Reservation {
    owner: ConnId,
    owner_name: String,
    queue: VecDeque<Candidate>,
}

/// Outcome of promoting a queued candidate to full partner.
#[derive(Debug)]
pub struct Promotion {
    pub owner: ConnId,
    pub owner_name: String,
    pub partner: Candidate,
    /// Everyone else still queued, to be evicted with a notice.
    pub evicted: Vec<Candidate>,
}

#[derive(Default)]
pub struct MatchmakingRegistry {
    reservations: HashMap<LevelId, Reservation>,
    coop_waiting: Option<Candidate>,
}

impl MatchmakingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a classic-duo creator on the level. Fails when the level is
    /// already reserved.
    pub fn reserve(&mut self, level: &str, owner: ConnId, owner_name: String) -> bool {
        if self.reservations.contains_key(level) {
            return false;
        }
        self.reservations.insert(
            level.to_string(),
            Reservation {
                owner,
                owner_name,
                queue: VecDeque::new(),
            },
        );
        true
    }

    pub fn owner_of(&self, level: &str) -> Option<ConnId> {
        self.reservations.get(level).map(|r| r.owner)
    }

    /// Level currently reserved by this connection, if any.
    pub fn reservation_of(&self, owner: ConnId) -> Option<LevelId> {
        self.reservations
            .iter()
            .find(|(_, r)| r.owner == owner)
            .map(|(level, _)| level.clone())
    }

    /// Enqueues a join request behind the level's owner. Returns the queue
    /// head (the oldest candidate, not necessarily the new one) or `None`
    /// when the level has no reservation.
    pub fn enqueue(&mut self, level: &str, conn: ConnId, name: String) -> Option<Candidate> {
        let reservation = self.reservations.get_mut(level)?;
        reservation.queue.push_back(Candidate { conn, name });
        reservation.queue.front().cloned()
    }

    pub fn head(&self, level: &str) -> Option<Candidate> {
        self.reservations
            .get(level)?
            .queue
            .front()
            .cloned()
    }

    /// Accept path: removes the reservation, promoting the oldest candidate
    /// and returning the rest for eviction.
    pub fn promote(&mut self, level: &str) -> Option<Promotion> {
        let mut reservation = self.reservations.remove(level)?;
        match reservation.queue.pop_front() {
            Some(partner) => Some(Promotion {
                owner: reservation.owner,
                owner_name: reservation.owner_name,
                partner,
                evicted: reservation.queue.into_iter().collect(),
            }),
            None => {
                // Nobody queued; the reservation stays put.
                self.reservations.insert(level.to_string(), reservation);
                None
            }
        }
    }

    /// Reject path: drops only the oldest candidate. Returns the rejected
    /// candidate and the new head, if any.
    pub fn reject_head(&mut self, level: &str) -> Option<(Candidate, Option<Candidate>)> {
        let reservation = self.reservations.get_mut(level)?;
        let rejected = reservation.queue.pop_front()?;
        Some((rejected, reservation.queue.front().cloned()))
    }

    /// A queued participant cancels its own request. Returns the level, the
    /// reservation owner, and the new head when the head changed.
    pub fn remove_queued(&mut self, conn: ConnId) -> Option<(LevelId, ConnId, Option<Candidate>)> {
        for (level, reservation) in self.reservations.iter_mut() {
            let Some(pos) = reservation.queue.iter().position(|c| c.conn == conn) else {
                continue;
            };
            reservation.queue.remove(pos);
            let new_head = if pos == 0 {
                reservation.queue.front().cloned()
            } else {
                None
            };
            return Some((level.clone(), reservation.owner, new_head));
        }
        None
    }

    /// Owner cancellation: tears down the reservation and returns the whole
    /// queue for eviction.
    pub fn cancel_reservation(&mut self, owner: ConnId) -> Option<(LevelId, Vec<Candidate>)> {
        let level = self.reservation_of(owner)?;
        let reservation = self.reservations.remove(&level)?;
        Some((level, reservation.queue.into_iter().collect()))
    }

    /// Parks the first limited-coop caller; the second caller pairs with it.
    pub fn park_coop(&mut self, conn: ConnId, name: String) {
        self.coop_waiting = Some(Candidate { conn, name });
    }

    /// Takes the parked coop candidate, if one is waiting.
    pub fn take_coop(&mut self) -> Option<Candidate> {
        self.coop_waiting.take()
    }

    pub fn coop_waiting(&self) -> Option<&Candidate> {
        self.coop_waiting.as_ref()
    }

    /// Removes the connection from the coop slot if it is the one parked.
    pub fn leave_coop(&mut self, conn: ConnId) -> bool {
        if self.coop_waiting.as_ref().map(|c| c.conn) == Some(conn) {
            self.coop_waiting = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_exclusive() {
        let mut registry = MatchmakingRegistry::new();
        assert!(registry.reserve("lvl", 1, "ana".to_string()));
        assert!(!registry.reserve("lvl", 2, "bo".to_string()));
        assert_eq!(registry.owner_of("lvl"), Some(1));
        assert_eq!(registry.reservation_of(1), Some("lvl".to_string()));
    }

    #[test]
    fn test_enqueue_reports_oldest_head() {
        let mut registry = MatchmakingRegistry::new();
        registry.reserve("lvl", 1, "ana".to_string());

        let head = registry.enqueue("lvl", 2, "bo".to_string()).unwrap();
        assert_eq!(head.conn, 2);

        // A later request does not displace the head.
        let head = registry.enqueue("lvl", 3, "cy".to_string()).unwrap();
        assert_eq!(head.conn, 2);
    }

    #[test]
    fn test_enqueue_without_reservation_fails() {
        let mut registry = MatchmakingRegistry::new();
        assert!(registry.enqueue("ghost", 2, "bo".to_string()).is_none());
    }

    #[test]
    fn test_promote_pairs_head_and_evicts_rest() {
        let mut registry = MatchmakingRegistry::new();
        registry.reserve("lvl", 1, "ana".to_string());
        registry.enqueue("lvl", 2, "bo".to_string());
        registry.enqueue("lvl", 3, "cy".to_string());
        registry.enqueue("lvl", 4, "di".to_string());

        let promotion = registry.promote("lvl").unwrap();
        assert_eq!(promotion.owner, 1);
        assert_eq!(promotion.owner_name, "ana");
        assert_eq!(promotion.partner.conn, 2);
        let evicted: Vec<ConnId> = promotion.evicted.iter().map(|c| c.conn).collect();
        assert_eq!(evicted, vec![3, 4]);

        // Reservation is gone afterwards.
        assert_eq!(registry.owner_of("lvl"), None);
    }

    #[test]
    fn test_reject_promotes_next_candidate() {
        let mut registry = MatchmakingRegistry::new();
        registry.reserve("lvl", 1, "ana".to_string());
        registry.enqueue("lvl", 2, "bo".to_string());
        registry.enqueue("lvl", 3, "cy".to_string());

        let (rejected, new_head) = registry.reject_head("lvl").unwrap();
        assert_eq!(rejected.conn, 2);
        assert_eq!(new_head.unwrap().conn, 3);

        let (rejected, new_head) = registry.reject_head("lvl").unwrap();
        assert_eq!(rejected.conn, 3);
        assert!(new_head.is_none());
    }

    #[test]
    fn test_queued_self_cancel_promotes_new_head() {
        let mut registry = MatchmakingRegistry::new();
        registry.reserve("lvl", 1, "ana".to_string());
        registry.enqueue("lvl", 2, "bo".to_string());
        registry.enqueue("lvl", 3, "cy".to_string());

        // Head cancels: new head surfaces.
        let (level, owner, new_head) = registry.remove_queued(2).unwrap();
        assert_eq!(level, "lvl");
        assert_eq!(owner, 1);
        assert_eq!(new_head.unwrap().conn, 3);

        // Non-head cancel reports no head change.
        registry.enqueue("lvl", 4, "di".to_string());
        let (_, _, new_head) = registry.remove_queued(4).unwrap();
        assert!(new_head.is_none());
    }

    #[test]
    fn test_owner_cancel_returns_whole_queue() {
        let mut registry = MatchmakingRegistry::new();
        registry.reserve("lvl", 1, "ana".to_string());
        registry.enqueue("lvl", 2, "bo".to_string());
        registry.enqueue("lvl", 3, "cy".to_string());

        let (level, evicted) = registry.cancel_reservation(1).unwrap();
        assert_eq!(level, "lvl");
        assert_eq!(evicted.len(), 2);
        assert_eq!(registry.owner_of("lvl"), None);
    }

    #[test]
    fn test_coop_parking_and_pairing() {
        let mut registry = MatchmakingRegistry::new();
        assert!(registry.take_coop().is_none());

        registry.park_coop(7, "ana".to_string());
        assert_eq!(registry.coop_waiting().unwrap().conn, 7);

        let partner = registry.take_coop().unwrap();
        assert_eq!(partner.conn, 7);
        assert!(registry.take_coop().is_none());
    }

    #[test]
    fn test_leave_coop_only_removes_own_entry() {
        let mut registry = MatchmakingRegistry::new();
        registry.park_coop(7, "ana".to_string());

        assert!(!registry.leave_coop(8));
        assert!(registry.coop_waiting().is_some());
        assert!(registry.leave_coop(7));
        assert!(registry.coop_waiting().is_none());
    }
}
