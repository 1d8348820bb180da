//! Lobby orchestrator: connection lifecycle, matchmaking, session
//! lifecycle, and the gameplay event handlers.
//!
//! The lobby owns all mutable game state and is driven by a single event
//! loop: every [`Inbound`] message runs to completion before the next one,
//! so handlers mutate state without locks. Per-room tick tasks feed back
//! into the same channel, which keeps timer-driven transitions serialized
//! with client requests.

use crate::error::GameError;
use crate::gameplay::{self, ClickOutcome, EndState};
use crate::history::HistoryLog;
use crate::leaderboard::{ordinal, LeaderboardStore};
use crate::level::{LevelMeta, LevelStore};
use crate::matchmaking::MatchmakingRegistry;
use crate::session::{Session, SessionStore};
use crate::utils::now_ms;
use log::{debug, info, warn};
use shared::{
    ClientEvent, CompletionStats, ConnId, Coord, GameConstants, GameMode, HistoryRecord, RoomId,
    ServerEvent, SessionStats,
};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;

/// Messages the orchestrator consumes. Transport tasks produce the first
/// three; per-room timer tasks produce `Tick`.
#[derive(Debug)]
pub enum Inbound {
    Connected { conn: ConnId },
    Disconnected { conn: ConnId },
    Client { conn: ConnId, event: ClientEvent },
    Tick { room: RoomId },
}

/// One outbound event addressed to a single connection.
#[derive(Debug)]
pub struct Outbound {
    pub conn: ConnId,
    pub event: ServerEvent,
}

/// What a session teardown records in history.
#[derive(Debug, Default)]
struct SessionOutcome {
    winner: Option<String>,
    quitter: Option<String>,
}

pub struct Lobby {
    constants: GameConstants,
    levels: LevelStore,
    sessions: SessionStore,
    matchmaking: MatchmakingRegistry,
    leaderboards: LeaderboardStore,
    history: HistoryLog,
    connections: HashSet<ConnId>,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Clone of the gateway's inbound sender, handed to timer tasks.
    self_tx: mpsc::UnboundedSender<Inbound>,
}

impl Lobby {
    pub fn new(
        constants: GameConstants,
        levels: LevelStore,
        leaderboards: LeaderboardStore,
        history: HistoryLog,
        outbound: mpsc::UnboundedSender<Outbound>,
        self_tx: mpsc::UnboundedSender<Inbound>,
    ) -> Self {
        Self {
            constants,
            levels,
            sessions: SessionStore::new(),
            matchmaking: MatchmakingRegistry::new(),
            leaderboards,
            history,
            connections: HashSet::new(),
            outbound,
            self_tx,
        }
    }

    /// Dispatches one inbound message to completion.
    pub fn handle(&mut self, message: Inbound) -> Result<(), GameError> {
        match message {
            Inbound::Connected { conn } => {
                self.on_connect(conn);
                Ok(())
            }
            Inbound::Disconnected { conn } => self.on_disconnect(conn),
            Inbound::Client { conn, event } => self.on_event(conn, event),
            Inbound::Tick { room } => self.on_tick(room),
        }
    }

    pub fn on_connect(&mut self, conn: ConnId) {
        self.connections.insert(conn);
        info!("Connection {} opened", conn);
    }

    /// Disconnection is a lifecycle transition, never an error: queued or
    /// parked entries evaporate, live sessions end as quit/abandonment.
    pub fn on_disconnect(&mut self, conn: ConnId) -> Result<(), GameError> {
        self.connections.remove(&conn);
        info!("Connection {} closed", conn);

        self.matchmaking.leave_coop(conn);

        if let Some((_, owner, new_head)) = self.matchmaking.remove_queued(conn) {
            if let Some(head) = new_head {
                self.send(owner, ServerEvent::PartnerCandidate { name: head.name });
            }
        }

        if let Some((level, evicted)) = self.matchmaking.cancel_reservation(conn) {
            debug!("Reservation of level {} dropped on disconnect", level);
            for candidate in evicted {
                self.send(candidate.conn, ServerEvent::RoomNoLongerExists);
            }
        }

        if let Some(room_id) = self.sessions.room_of(conn) {
            self.abandon(room_id, conn)?;
        }
        Ok(())
    }

    pub fn on_event(&mut self, conn: ConnId, event: ClientEvent) -> Result<(), GameError> {
        match event {
            ClientEvent::CreateRoom {
                level_id,
                mode,
                player_name,
            } => self.create_room(conn, level_id, mode, player_name),
            ClientEvent::JoinRoom {
                level_id,
                player_name,
            } => {
                self.join_room(conn, level_id, player_name);
                Ok(())
            }
            ClientEvent::AcceptPartner => self.accept_partner(conn),
            ClientEvent::RejectPartner => {
                self.reject_partner(conn);
                Ok(())
            }
            ClientEvent::CancelRoom => {
                self.cancel_room(conn);
                Ok(())
            }
            ClientEvent::CancelJoin => {
                self.cancel_join(conn);
                Ok(())
            }
            ClientEvent::RequestCoop { player_name } => self.request_coop(conn, player_name),
            ClientEvent::LeaveCoop => {
                self.matchmaking.leave_coop(conn);
                Ok(())
            }
            ClientEvent::Click {
                coords, room_id, ..
            } => self.click(conn, coords, room_id),
            ClientEvent::UseHint { room_id } => {
                self.use_hint(conn, room_id);
                Ok(())
            }
            ClientEvent::CloseRoom { room_id, abandoned } => {
                self.close_room(conn, room_id, abandoned)
            }
            ClientEvent::SetConstants { constants } => {
                self.set_constants(constants);
                Ok(())
            }
            ClientEvent::GetConstants => {
                self.send(
                    conn,
                    ServerEvent::ConstantsChanged {
                        constants: self.constants,
                    },
                );
                Ok(())
            }
            ClientEvent::RecordCompletion { stats } => {
                self.record_completion(conn, stats);
                Ok(())
            }
            ClientEvent::GetHistory => {
                let records = self.history.load()?;
                self.send(conn, ServerEvent::HistoryAppended { records });
                Ok(())
            }
            ClientEvent::ResetHistory => {
                self.history.reset()?;
                for &member in &self.connections {
                    self.send(member, ServerEvent::HistoryReset);
                }
                Ok(())
            }
        }
    }

    // --- room creation and matchmaking ------------------------------------

    fn create_room(
        &mut self,
        conn: ConnId,
        level_id: Option<String>,
        mode: GameMode,
        player_name: String,
    ) -> Result<(), GameError> {
        match mode {
            GameMode::ClassicSolo => {
                let Some(meta) = level_id.and_then(|id| self.available_level(&id)) else {
                    self.send(conn, ServerEvent::RoomNoLongerExists);
                    return Ok(());
                };
                self.start_session(mode, meta, vec![(conn, player_name)])?;
                Ok(())
            }
            GameMode::ClassicDuo => {
                let Some(meta) = level_id.and_then(|id| self.available_level(&id)) else {
                    self.send(conn, ServerEvent::RoomNoLongerExists);
                    return Ok(());
                };
                if !self.matchmaking.reserve(&meta.id, conn, player_name) {
                    self.send(conn, ServerEvent::RoomNoLongerExists);
                    return Ok(());
                }
                info!("Connection {} reserved level {} for duo play", conn, meta.id);
                Ok(())
            }
            // Limited modes ignore any passed level id and pick their own.
            GameMode::LimitedSolo => {
                let Some(meta) = self.levels.pick_unplayed(&HashSet::new()) else {
                    self.send(conn, ServerEvent::RoomNoLongerExists);
                    return Ok(());
                };
                self.start_session(mode, meta, vec![(conn, player_name)])?;
                Ok(())
            }
            GameMode::LimitedDuo => self.request_coop(conn, player_name),
        }
    }

    fn available_level(&self, id: &str) -> Option<LevelMeta> {
        self.levels.meta(id).filter(|meta| meta.available).cloned()
    }

    fn join_room(&mut self, conn: ConnId, level_id: String, player_name: String) {
        match self.matchmaking.enqueue(&level_id, conn, player_name) {
            Some(head) => {
                if let Some(owner) = self.matchmaking.owner_of(&level_id) {
                    self.send(owner, ServerEvent::PartnerCandidate { name: head.name });
                }
            }
            // Owner no longer exists: alert the requester instead.
            None => self.send(conn, ServerEvent::RoomNoLongerExists),
        }
    }

    fn accept_partner(&mut self, conn: ConnId) -> Result<(), GameError> {
        let Some(level) = self.matchmaking.reservation_of(conn) else {
            return Ok(());
        };
        if self.matchmaking.head(&level).is_none() {
            // Double-accept or accept with an empty queue: idempotent no-op.
            return Ok(());
        }

        // Catalog write comes first so a storage failure rejects the accept
        // before anyone is promoted.
        if let Err(err) = self.levels.set_available(&level, false) {
            warn!("Accept on level {} rejected: {}", level, err);
            return Ok(());
        }

        let Some(promotion) = self.matchmaking.promote(&level) else {
            return Ok(());
        };
        for candidate in promotion.evicted {
            self.send(candidate.conn, ServerEvent::RoomNoLongerExists);
        }

        let meta = match self.levels.meta(&level) {
            Some(meta) => meta.clone(),
            None => return Err(GameError::LevelNotFound(level)),
        };
        self.start_session(
            GameMode::ClassicDuo,
            meta,
            vec![
                (promotion.owner, promotion.owner_name),
                (promotion.partner.conn, promotion.partner.name),
            ],
        )?;
        Ok(())
    }

    fn reject_partner(&mut self, conn: ConnId) {
        let Some(level) = self.matchmaking.reservation_of(conn) else {
            return;
        };
        if let Some((rejected, new_head)) = self.matchmaking.reject_head(&level) {
            self.send(rejected.conn, ServerEvent::PartnerRejected);
            if let Some(head) = new_head {
                self.send(conn, ServerEvent::PartnerCandidate { name: head.name });
            }
        }
    }

    fn cancel_room(&mut self, conn: ConnId) {
        if let Some((level, evicted)) = self.matchmaking.cancel_reservation(conn) {
            info!("Connection {} cancelled its reservation of {}", conn, level);
            for candidate in evicted {
                self.send(candidate.conn, ServerEvent::RoomNoLongerExists);
            }
        }
    }

    fn cancel_join(&mut self, conn: ConnId) {
        if let Some((_, owner, new_head)) = self.matchmaking.remove_queued(conn) {
            self.send(conn, ServerEvent::JoinCancelled);
            if let Some(head) = new_head {
                self.send(owner, ServerEvent::PartnerCandidate { name: head.name });
            }
        }
    }

    fn request_coop(&mut self, conn: ConnId, player_name: String) -> Result<(), GameError> {
        let Some(partner) = self.matchmaking.take_coop() else {
            self.matchmaking.park_coop(conn, player_name);
            return Ok(());
        };
        if partner.conn == conn {
            // Re-request from the parked connection just refreshes the name.
            self.matchmaking.park_coop(conn, player_name);
            return Ok(());
        }

        let Some(meta) = self.levels.pick_unplayed(&HashSet::new()) else {
            self.matchmaking.park_coop(partner.conn, partner.name);
            self.send(conn, ServerEvent::RoomNoLongerExists);
            return Ok(());
        };
        self.start_session(
            GameMode::LimitedDuo,
            meta,
            vec![(partner.conn, partner.name), (conn, player_name)],
        )?;
        Ok(())
    }

    /// Creates the session, starts its tick task, and announces the start.
    fn start_session(
        &mut self,
        mode: GameMode,
        meta: LevelMeta,
        players: Vec<(ConnId, String)>,
    ) -> Result<RoomId, GameError> {
        let index = self.levels.index(&meta.id)?;
        let started_at_ms = now_ms();
        let room_id = self.sessions.create(
            mode,
            meta.id.clone(),
            index.total_groups(),
            self.constants,
            started_at_ms,
        );

        let (names, conns, remaining_coords, stats) = {
            let session = self
                .sessions
                .get_mut(room_id)
                .ok_or(GameError::RoomNotFound(room_id))?;
            for (conn, name) in &players {
                session.add_player(*conn, name.clone());
            }

            let tick_tx = self.self_tx.clone();
            session.attach_timer(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(1));
                // Skip the first tick since it fires immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if tick_tx.send(Inbound::Tick { room: room_id }).is_err() {
                        break;
                    }
                }
            }));

            (
                session.player_names(),
                session.players.iter().map(|p| p.conn).collect::<Vec<_>>(),
                index.remaining_coords(&session.remaining),
                SessionStats {
                    started_at_ms,
                    total_groups: session.total_groups,
                    constants: session.constants,
                },
            )
        };

        for &conn in &conns {
            self.send(conn, ServerEvent::RoomIdAssigned { id: room_id });
        }
        if let [p1, p2] = names.as_slice() {
            for &conn in &conns {
                self.send(
                    conn,
                    ServerEvent::NamesAssigned {
                        p1: p1.clone(),
                        p2: p2.clone(),
                    },
                );
            }
        }
        for &conn in &conns {
            self.send(
                conn,
                ServerEvent::SessionStarted {
                    room_id,
                    remaining_coords: remaining_coords.clone(),
                    mode,
                    stats: stats.clone(),
                },
            );
        }

        info!(
            "Room {} started: {:?} on level {} with {:?}",
            room_id, mode, meta.id, names
        );
        Ok(room_id)
    }

    // --- gameplay ----------------------------------------------------------

    fn click(&mut self, conn: ConnId, coords: Coord, room_id: RoomId) -> Result<(), GameError> {
        let Some(level_id) = self.sessions.get(room_id).map(|s| s.level_id.clone()) else {
            self.send(conn, ServerEvent::RoomNoLongerExists);
            return Ok(());
        };
        let index = self.levels.index(&level_id)?;

        let Some(session) = self.sessions.get_mut(room_id) else {
            return Ok(());
        };
        let members: Vec<ConnId> = session.players.iter().map(|p| p.conn).collect();
        let outcome = gameplay::validate_click(session, &index, coords, conn);

        match outcome {
            ClickOutcome::NotADifference => {
                let remaining_coords = index.remaining_coords(&session.remaining);
                self.broadcast(
                    &members,
                    ServerEvent::ClickResult {
                        is_difference: false,
                        pixels: Vec::new(),
                        remaining_coords,
                        player_id: conn,
                    },
                );
                Ok(())
            }
            ClickOutcome::Found { pixels, .. } => {
                let limited = session.mode.is_limited();
                let clock = if limited {
                    Some(session.credit_time())
                } else {
                    None
                };
                let remaining_coords = index.remaining_coords(&session.remaining);
                let end = gameplay::end_condition(session);

                self.broadcast(
                    &members,
                    ServerEvent::ClickResult {
                        is_difference: true,
                        pixels,
                        remaining_coords,
                        player_id: conn,
                    },
                );
                if let Some(value) = clock {
                    self.broadcast(&members, ServerEvent::Clock { value });
                }

                if limited {
                    self.advance_limited(room_id)
                } else if let Some(end) = end {
                    self.finish_classic(room_id, end)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Limited mode: every find provisions the next unplayed level; an
    /// exhausted catalog ends the session as won.
    fn advance_limited(&mut self, room_id: RoomId) -> Result<(), GameError> {
        let Some(played) = self.sessions.get(room_id).map(|s| s.played_levels.clone()) else {
            return Ok(());
        };

        let Some(meta) = self.levels.pick_unplayed(&played) else {
            return self.finish_limited(room_id, true);
        };
        let index = self.levels.index(&meta.id)?;

        let Some(session) = self.sessions.get_mut(room_id) else {
            return Ok(());
        };
        session.advance_level(meta.id.clone(), index.total_groups());
        let members: Vec<ConnId> = session.players.iter().map(|p| p.conn).collect();
        let remaining_coords = index.remaining_coords(&session.remaining);

        self.broadcast(
            &members,
            ServerEvent::LimitedRoundAdvance {
                level: meta.id,
                remaining_coords,
            },
        );
        Ok(())
    }

    fn use_hint(&mut self, conn: ConnId, room_id: RoomId) {
        let Some(session) = self.sessions.get_mut(room_id) else {
            self.send(conn, ServerEvent::RoomNoLongerExists);
            return;
        };
        let value = session.hint_cost();
        let members: Vec<ConnId> = session.players.iter().map(|p| p.conn).collect();
        self.broadcast(&members, ServerEvent::Clock { value });
    }

    /// One-second timer tick. A tick racing a just-removed room is dropped.
    fn on_tick(&mut self, room_id: RoomId) -> Result<(), GameError> {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return Ok(());
        };
        let value = session.tick_clock();
        let limited = session.mode.is_limited();
        let members: Vec<ConnId> = session.players.iter().map(|p| p.conn).collect();

        self.broadcast(&members, ServerEvent::Clock { value });

        if limited && value == 0 {
            self.finish_limited(room_id, false)?;
        }
        Ok(())
    }

    // --- session end -------------------------------------------------------

    fn finish_classic(&mut self, room_id: RoomId, end: EndState) -> Result<(), GameError> {
        let winner = match end {
            EndState::SoloComplete { winner } | EndState::DuoMajority { winner } => winner,
        };
        let Some(session) = self.sessions.get(room_id) else {
            return Ok(());
        };
        let winner_name = session.player(winner).map(|p| p.name.clone());
        let members: Vec<ConnId> = session.players.iter().map(|p| p.conn).collect();

        self.broadcast(
            &members,
            ServerEvent::SessionEnded {
                winner_id: Some(winner),
                winner_name: winner_name.clone(),
            },
        );
        self.teardown(
            room_id,
            SessionOutcome {
                winner: winner_name,
                quitter: None,
            },
        )
    }

    fn finish_limited(&mut self, room_id: RoomId, won: bool) -> Result<(), GameError> {
        let Some(session) = self.sessions.get(room_id) else {
            return Ok(());
        };
        let members: Vec<ConnId> = session.players.iter().map(|p| p.conn).collect();
        self.broadcast(&members, ServerEvent::LimitedSessionEnded { won });
        self.teardown(room_id, SessionOutcome::default())
    }

    fn close_room(
        &mut self,
        conn: ConnId,
        room_id: RoomId,
        abandoned: bool,
    ) -> Result<(), GameError> {
        if self.sessions.get(room_id).is_none() {
            self.send(conn, ServerEvent::RoomNoLongerExists);
            return Ok(());
        }
        if abandoned {
            return self.abandon(room_id, conn);
        }

        let members: Vec<ConnId> = self
            .sessions
            .get(room_id)
            .map(|s| s.players.iter().map(|p| p.conn).collect())
            .unwrap_or_default();
        self.broadcast(
            &members,
            ServerEvent::SessionEnded {
                winner_id: None,
                winner_name: None,
            },
        );
        self.teardown(room_id, SessionOutcome::default())
    }

    /// A player left mid-session (disconnect or abandoning close).
    ///
    /// Solo: record the quitter and fail the session silently. Classic-duo
    /// with one player remaining: that player wins by default. Limited-duo:
    /// no automatic winner; the remainder is told the partner left and may
    /// start a limited-solo session to continue.
    fn abandon(&mut self, room_id: RoomId, leaver: ConnId) -> Result<(), GameError> {
        let Some(session) = self.sessions.get(room_id) else {
            return Ok(());
        };
        let mode = session.mode;
        let quitter = session.player(leaver).map(|p| p.name.clone());
        let remaining: Vec<(ConnId, String)> = session
            .players
            .iter()
            .filter(|p| p.conn != leaver)
            .map(|p| (p.conn, p.name.clone()))
            .collect();

        match mode {
            GameMode::ClassicSolo | GameMode::LimitedSolo => self.teardown(
                room_id,
                SessionOutcome {
                    winner: None,
                    quitter,
                },
            ),
            GameMode::ClassicDuo => {
                let winner = if remaining.len() == 1 {
                    let (winner_conn, winner_name) = remaining[0].clone();
                    self.send(
                        winner_conn,
                        ServerEvent::SessionEnded {
                            winner_id: Some(winner_conn),
                            winner_name: Some(winner_name.clone()),
                        },
                    );
                    Some(winner_name)
                } else {
                    None
                };
                self.teardown(room_id, SessionOutcome { winner, quitter })
            }
            GameMode::LimitedDuo => {
                for (conn, _) in &remaining {
                    self.send(*conn, ServerEvent::PartnerLeft);
                }
                self.teardown(
                    room_id,
                    SessionOutcome {
                        winner: None,
                        quitter,
                    },
                )
            }
        }
    }

    /// The single teardown path: cancels the timer, restores classic level
    /// availability, appends the history record, and frees the room.
    fn teardown(&mut self, room_id: RoomId, outcome: SessionOutcome) -> Result<(), GameError> {
        let Some(mut session) = self.sessions.remove(room_id) else {
            return Ok(());
        };
        session.cancel_timer();

        if !session.mode.is_limited() {
            if let Err(err) = self.levels.set_available(&session.level_id, true) {
                warn!(
                    "Could not restore availability of level {}: {}",
                    session.level_id, err
                );
            }
        }

        let record = HistoryRecord {
            start_time_ms: session.started_at_ms,
            duration_secs: now_ms().saturating_sub(session.started_at_ms) / 1000,
            mode: session.mode,
            players: session.player_names(),
            quitter: outcome.quitter,
            winner: outcome.winner,
        };
        self.history.append(record)?;

        info!("Room {} closed", room_id);
        Ok(())
    }

    // --- constants and leaderboard ----------------------------------------

    fn set_constants(&mut self, constants: GameConstants) {
        self.constants = constants;
        info!("Game constants changed to {:?}", constants);
        for &conn in &self.connections {
            self.send(conn, ServerEvent::ConstantsChanged { constants });
        }
    }

    fn record_completion(&mut self, conn: ConnId, stats: CompletionStats) {
        match self.leaderboards.record(
            &stats.level_id,
            stats.party_size,
            &stats.player_name,
            stats.minutes,
            stats.seconds,
        ) {
            Ok(Some(rank)) => self.send(
                conn,
                ServerEvent::NewRecord {
                    rank: rank as u8 + 1,
                    ordinal: ordinal(rank),
                },
            ),
            Ok(None) => {}
            // Rejected operation; the leaderboard stays as loaded.
            Err(err) => warn!("Completion for {} rejected: {}", stats.level_id, err),
        }
    }

    // --- plumbing ----------------------------------------------------------

    fn send(&self, conn: ConnId, event: ServerEvent) {
        if self.outbound.send(Outbound { conn, event }).is_err() {
            warn!("Outbound channel closed; dropping event for {}", conn);
        }
    }

    fn broadcast(&self, members: &[ConnId], event: ServerEvent) {
        for &conn in members {
            self.send(conn, event.clone());
        }
    }

    // --- test and diagnostics accessors ------------------------------------

    pub fn constants(&self) -> GameConstants {
        self.constants
    }

    pub fn session(&self, room_id: RoomId) -> Option<&Session> {
        self.sessions.get(room_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_of(&self, conn: ConnId) -> Option<RoomId> {
        self.sessions.room_of(conn)
    }
}
