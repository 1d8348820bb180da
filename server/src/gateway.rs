//! Event gateway: the UDP transport feeding the lobby's event loop.
//!
//! The lobby itself is channel-agnostic; it only sees [`Inbound`] messages
//! and emits [`Outbound`] events. This module supplies the concrete
//! transport: a receiver task deserializing frames, a sender task routing
//! outbound events to addresses, and a timeout checker synthesizing
//! disconnects for silent peers.

use crate::history::HistoryLog;
use crate::leaderboard::LeaderboardStore;
use crate::level::LevelStore;
use crate::lobby::{Inbound, Lobby, Outbound};
use log::{debug, error, info, warn};
use shared::{ClientFrame, ConnId, GameConstants};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

const CONN_TIMEOUT: Duration = Duration::from_secs(5);

struct ConnEntry {
    id: ConnId,
    last_seen: Instant,
}

/// Maps transport addresses to logical connection ids.
pub struct ConnTable {
    by_addr: HashMap<SocketAddr, ConnEntry>,
    addr_of: HashMap<ConnId, SocketAddr>,
    next_id: ConnId,
}

impl Default for ConnTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnTable {
    pub fn new() -> Self {
        Self {
            by_addr: HashMap::new(),
            addr_of: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers the connection behind an address, or refreshes its
    /// activity timestamp. Returns the id and whether it is new.
    pub fn register(&mut self, addr: SocketAddr) -> (ConnId, bool) {
        if let Some(entry) = self.by_addr.get_mut(&addr) {
            entry.last_seen = Instant::now();
            return (entry.id, false);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_addr.insert(
            addr,
            ConnEntry {
                id,
                last_seen: Instant::now(),
            },
        );
        self.addr_of.insert(id, addr);
        (id, true)
    }

    pub fn remove_addr(&mut self, addr: SocketAddr) -> Option<ConnId> {
        let entry = self.by_addr.remove(&addr)?;
        self.addr_of.remove(&entry.id);
        Some(entry.id)
    }

    pub fn addr(&self, conn: ConnId) -> Option<SocketAddr> {
        self.addr_of.get(&conn).copied()
    }

    /// Removes and returns every connection silent for longer than the
    /// timeout.
    pub fn sweep(&mut self, timeout: Duration) -> Vec<ConnId> {
        let timed_out: Vec<SocketAddr> = self
            .by_addr
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > timeout)
            .map(|(addr, _)| *addr)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|addr| self.remove_addr(addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}

/// UDP gateway wiring the transport tasks to the lobby event loop.
pub struct Gateway {
    socket: Arc<UdpSocket>,
    conns: Arc<RwLock<ConnTable>>,
    lobby: Lobby,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
}

impl Gateway {
    pub async fn bind(
        addr: &str,
        constants: GameConstants,
        levels: LevelStore,
        leaderboards: LeaderboardStore,
        history: HistoryLog,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Gateway listening on {}", addr);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let lobby = Lobby::new(
            constants,
            levels,
            leaderboards,
            history,
            outbound_tx,
            inbound_tx.clone(),
        );

        Ok(Self {
            socket,
            conns: Arc::new(RwLock::new(ConnTable::new())),
            lobby,
            inbound_tx,
            inbound_rx,
            outbound_rx: Some(outbound_rx),
        })
    }

    /// Spawns the task that deserializes incoming frames.
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let conns = Arc::clone(&self.conns);
        let inbound_tx = self.inbound_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let Ok(frame) = bincode::deserialize::<ClientFrame>(&buffer[0..len])
                        else {
                            warn!("Failed to deserialize frame from {}", addr);
                            continue;
                        };

                        let messages = {
                            let mut conns = conns.write().await;
                            frame_to_messages(&mut conns, addr, frame)
                        };
                        for message in messages {
                            if inbound_tx.send(message).is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        error!("Error receiving frame: {}", err);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that routes outbound events to addresses.
    fn spawn_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let conns = Arc::clone(&self.conns);
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(Outbound { conn, event }) = outbound_rx.recv().await {
                let addr = {
                    let conns = conns.read().await;
                    conns.addr(conn)
                };
                let Some(addr) = addr else {
                    debug!("Dropping event for vanished connection {}", conn);
                    continue;
                };

                match bincode::serialize(&event) {
                    Ok(bytes) => {
                        if let Err(err) = socket.send_to(&bytes, addr).await {
                            error!("Failed to send to {}: {}", addr, err);
                        }
                    }
                    Err(err) => error!("Failed to serialize event: {}", err),
                }
            }
        });
    }

    /// Spawns the task that turns prolonged silence into disconnects.
    fn spawn_timeout_checker(&self) {
        let conns = Arc::clone(&self.conns);
        let inbound_tx = self.inbound_tx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));

            loop {
                ticker.tick().await;

                let timed_out = {
                    let mut conns = conns.write().await;
                    conns.sweep(CONN_TIMEOUT)
                };
                for conn in timed_out {
                    info!("Connection {} timed out", conn);
                    if inbound_tx.send(Inbound::Disconnected { conn }).is_err() {
                        return;
                    }
                }
            }
        });
    }

    /// Runs the event loop until the channel closes or storage fails hard.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver();
        self.spawn_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        while let Some(message) = self.inbound_rx.recv().await {
            if let Err(err) = self.lobby.handle(message) {
                if err.is_fatal() {
                    error!("Fatal storage failure: {}", err);
                    return Err(err.into());
                } else if err.is_not_found() {
                    debug!("Ignoring stale reference: {}", err);
                } else {
                    warn!("Rejected event: {}", err);
                }
            }
        }

        Ok(())
    }
}

/// Translates one wire frame into lobby messages, updating the table.
fn frame_to_messages(
    conns: &mut ConnTable,
    addr: SocketAddr,
    frame: ClientFrame,
) -> Vec<Inbound> {
    match frame {
        ClientFrame::Hello => {
            let (conn, is_new) = conns.register(addr);
            if is_new {
                vec![Inbound::Connected { conn }]
            } else {
                Vec::new()
            }
        }
        ClientFrame::Event(event) => {
            // An event from an unknown address implies the connection;
            // clients racing their Hello still get served.
            let (conn, is_new) = conns.register(addr);
            let mut messages = Vec::with_capacity(2);
            if is_new {
                messages.push(Inbound::Connected { conn });
            }
            messages.push(Inbound::Client { conn, event });
            messages
        }
        ClientFrame::Bye => match conns.remove_addr(addr) {
            Some(conn) => vec![Inbound::Disconnected { conn }],
            None => Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ClientEvent;

    fn test_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_register_assigns_stable_ids() {
        let mut table = ConnTable::new();
        let (first, new_first) = table.register(test_addr(5000));
        let (second, new_second) = table.register(test_addr(5001));
        assert!(new_first && new_second);
        assert_ne!(first, second);

        let (again, is_new) = table.register(test_addr(5000));
        assert_eq!(again, first);
        assert!(!is_new);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_clears_both_directions() {
        let mut table = ConnTable::new();
        let (conn, _) = table.register(test_addr(5000));
        assert_eq!(table.addr(conn), Some(test_addr(5000)));

        assert_eq!(table.remove_addr(test_addr(5000)), Some(conn));
        assert_eq!(table.addr(conn), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_silent_connections() {
        let mut table = ConnTable::new();
        let (stale, _) = table.register(test_addr(5000));
        let (_fresh, _) = table.register(test_addr(5001));

        if let Some(entry) = table.by_addr.get_mut(&test_addr(5000)) {
            entry.last_seen = Instant::now() - Duration::from_secs(10);
        }

        let timed_out = table.sweep(Duration::from_secs(5));
        assert_eq!(timed_out, vec![stale]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_hello_then_event_connects_once() {
        let mut table = ConnTable::new();
        let addr = test_addr(5000);

        let first = frame_to_messages(&mut table, addr, ClientFrame::Hello);
        assert!(matches!(first.as_slice(), [Inbound::Connected { .. }]));

        let second = frame_to_messages(
            &mut table,
            addr,
            ClientFrame::Event(ClientEvent::GetConstants),
        );
        assert!(matches!(second.as_slice(), [Inbound::Client { .. }]));

        let third = frame_to_messages(&mut table, addr, ClientFrame::Bye);
        assert!(matches!(third.as_slice(), [Inbound::Disconnected { .. }]));
    }

    #[test]
    fn test_event_without_hello_implies_connection() {
        let mut table = ConnTable::new();
        let messages = frame_to_messages(
            &mut table,
            test_addr(5000),
            ClientFrame::Event(ClientEvent::GetConstants),
        );
        assert!(matches!(
            messages.as_slice(),
            [Inbound::Connected { .. }, Inbound::Client { .. }]
        ));
    }
}
