//! Client sessions and the idle reaper.
//!
//! Each connection is tracked by an explicit state machine rather than
//! timestamp checks scattered through the network loop — the
//! Idle/Closed transitions are testable without a socket in sight.
//! Reaping a session reclaims its resources; it never touches table
//! entries the session already delivered.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Notify;

use wallaby_core::dp::ClientId;

/// Lifecycle: `Connected → Active → Idle → Closed`. `Active` means a
/// frame arrived since the last sweep; `Idle` means the timeout elapsed
/// and the reaper will close the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Active,
    Idle,
    Closed,
}

#[derive(Debug)]
pub struct ClientSession {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub max_batch: u32,
    state: SessionState,
    last_activity: Instant,
}

impl ClientSession {
    pub fn new(id: ClientId, addr: SocketAddr, max_batch: u32, now: Instant) -> Self {
        ClientSession {
            id,
            addr,
            max_batch,
            state: SessionState::Connected,
            last_activity: now,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Any inbound frame counts as activity.
    pub fn touch(&mut self, now: Instant) {
        if self.state == SessionState::Closed {
            return;
        }
        self.last_activity = now;
        self.state = SessionState::Active;
    }

    /// Advance the timeout clock. Returns the state after the check.
    pub fn roll(&mut self, now: Instant, timeout: Duration) -> SessionState {
        if self.state != SessionState::Closed
            && now.duration_since(self.last_activity) >= timeout
        {
            self.state = SessionState::Idle;
        }
        self.state
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

/// One live connection's entry in the table: the state machine plus the
/// handle the reaper uses to interrupt the connection task.
pub struct SessionHandle {
    session: Mutex<ClientSession>,
    pub closer: Arc<Notify>,
}

impl SessionHandle {
    pub fn lock(&self) -> MutexGuard<'_, ClientSession> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// All live sessions, shared between connection tasks and the reaper.
pub struct SessionTable {
    sessions: DashMap<ClientId, Arc<SessionHandle>>,
    next_id: AtomicU64,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable {
            sessions: DashMap::new(),
            // id 0 is ClientId::UNSTAMPED; never hand it out
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a fresh connection and hand back its id and handle.
    pub fn register(&self, addr: SocketAddr, max_batch: u32) -> (ClientId, Arc<SessionHandle>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(SessionHandle {
            session: Mutex::new(ClientSession::new(id, addr, max_batch, Instant::now())),
            closer: Arc::new(Notify::new()),
        });
        self.sessions.insert(id, handle.clone());
        (id, handle)
    }

    pub fn touch(&self, id: ClientId) {
        if let Some(handle) = self.sessions.get(&id) {
            handle.lock().touch(Instant::now());
        }
    }

    pub fn remove(&self, id: ClientId) {
        self.sessions.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// One reaper sweep: roll every session, close the idle ones, and
    /// nudge their connection tasks. Returns the ids reaped.
    pub fn reap(&self, now: Instant, timeout: Duration) -> Vec<ClientId> {
        let mut reaped = Vec::new();
        for entry in self.sessions.iter() {
            let handle = entry.value();
            let mut session = handle.lock();
            if session.roll(now, timeout) == SessionState::Idle {
                session.close();
                handle.closer.notify_one();
                reaped.push(session.id);
            }
        }
        reaped
    }
}

/// Periodic sweep task. Runs until the table's owner drops it.
pub async fn reaper_loop(table: Arc<SessionTable>, timeout: Duration, sweep_every: Duration) {
    let mut interval = tokio::time::interval(sweep_every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        for id in table.reap(Instant::now(), timeout) {
            tracing::info!(client = %id, "idle session reaped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[test]
    fn lifecycle_connected_active_idle_closed() {
        let start = Instant::now();
        let timeout = Duration::from_secs(60);
        let mut session = ClientSession::new(ClientId(1), addr(), 64, start);
        assert_eq!(session.state(), SessionState::Connected);

        session.touch(start + Duration::from_secs(1));
        assert_eq!(session.state(), SessionState::Active);

        // quiet but within the timeout: still active
        assert_eq!(
            session.roll(start + Duration::from_secs(30), timeout),
            SessionState::Active
        );
        // timeout elapsed since last activity
        assert_eq!(
            session.roll(start + Duration::from_secs(62), timeout),
            SessionState::Idle
        );

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        // closed is terminal: neither touch nor roll revives it
        session.touch(start + Duration::from_secs(63));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            session.roll(start + Duration::from_secs(64), timeout),
            SessionState::Closed
        );
    }

    #[test]
    fn activity_resets_the_idle_clock() {
        let start = Instant::now();
        let timeout = Duration::from_secs(10);
        let mut session = ClientSession::new(ClientId(1), addr(), 64, start);

        session.touch(start + Duration::from_secs(9));
        assert_eq!(
            session.roll(start + Duration::from_secs(18), timeout),
            SessionState::Active
        );
        assert_eq!(
            session.roll(start + Duration::from_secs(19), timeout),
            SessionState::Idle
        );
    }

    #[test]
    fn reap_closes_only_the_quiet_sessions() {
        let table = SessionTable::new();
        let (idle_id, idle) = table.register(addr(), 64);
        let (busy_id, busy) = table.register(addr(), 64);
        assert_ne!(idle_id, busy_id);
        assert_eq!(table.len(), 2);

        let timeout = Duration::from_secs(5);
        let later = Instant::now() + Duration::from_secs(6);
        busy.lock().touch(later - Duration::from_secs(1));

        let reaped = table.reap(later, timeout);
        assert_eq!(reaped, vec![idle_id]);
        assert_eq!(idle.lock().state(), SessionState::Closed);
        assert_eq!(busy.lock().state(), SessionState::Active);
    }

    #[test]
    fn ids_are_unique_and_never_the_unstamped_zero() {
        let table = SessionTable::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let (id, _) = table.register(addr(), 1);
            assert_ne!(id, ClientId::UNSTAMPED);
            assert!(seen.insert(id));
        }
    }
}
