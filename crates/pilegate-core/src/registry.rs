//! Session registry with three consistent indices.
//!
//! Sessions are indexed by connection id (primary), device id, and ICCID.
//! Every create/rename/remove updates all indices inside one critical
//! section — the registry lives behind the driver's lock, so each public
//! method IS the critical section. Query methods return snapshots; callers
//! never hold references across suspension points.

use std::{collections::HashMap, time::Duration};

use crate::{
    error::SessionError,
    session::{DeviceSession, DeviceState, SessionSnapshot},
};

/// Default maximum number of concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Indexed store of live sessions.
#[derive(Debug)]
pub struct SessionRegistry<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    sessions: HashMap<u64, DeviceSession<I>>,
    by_device: HashMap<String, u64>,
    by_iccid: HashMap<String, u64>,
    limit: usize,
}

impl<I> SessionRegistry<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    /// Create a registry bounded at `limit` concurrent sessions.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_device: HashMap::new(),
            by_iccid: HashMap::new(),
            limit,
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create a session for a freshly accepted connection.
    ///
    /// # Errors
    ///
    /// - `CapacityExceeded` at the session limit
    /// - `DuplicateConnection` if the connection id is already registered
    pub fn create(
        &mut self,
        conn_id: u64,
        remote_addr: String,
        session_id: String,
        now: I,
        now_secs: u64,
    ) -> Result<&mut DeviceSession<I>, SessionError> {
        if self.sessions.len() >= self.limit {
            return Err(SessionError::CapacityExceeded { limit: self.limit });
        }
        if self.sessions.contains_key(&conn_id) {
            return Err(SessionError::DuplicateConnection { conn_id });
        }

        let session = DeviceSession::new(conn_id, remote_addr, session_id, now, now_secs);
        Ok(self.sessions.entry(conn_id).or_insert(session))
    }

    /// Session by connection id.
    #[must_use]
    pub fn get(&self, conn_id: u64) -> Option<&DeviceSession<I>> {
        self.sessions.get(&conn_id)
    }

    /// Mutable session by connection id.
    pub fn get_mut(&mut self, conn_id: u64) -> Option<&mut DeviceSession<I>> {
        self.sessions.get_mut(&conn_id)
    }

    /// Connection id currently bound to a device id.
    #[must_use]
    pub fn conn_by_device(&self, device_id: &str) -> Option<u64> {
        self.by_device.get(device_id).copied()
    }

    /// Connection id currently bound to an ICCID.
    #[must_use]
    pub fn conn_by_iccid(&self, iccid: &str) -> Option<u64> {
        self.by_iccid.get(iccid).copied()
    }

    /// Index the session's ICCID.
    ///
    /// A reconnecting SIM steals the index entry from its stale session;
    /// that session keeps its ICCID attribute but is no longer reachable
    /// through this index.
    pub fn bind_iccid(&mut self, conn_id: u64, iccid: &str) {
        if let Some(session) = self.sessions.get_mut(&conn_id) {
            session.set_iccid(iccid.to_string());
            self.by_iccid.insert(iccid.to_string(), conn_id);
        }
    }

    /// Index the session's device identity (the rename at registration).
    ///
    /// Returns the connection id of a displaced session when the device was
    /// already bound to another live connection (unconditional reconnect
    /// policy: the newest connection wins).
    pub fn bind_device(&mut self, conn_id: u64, device_id: &str) -> Option<u64> {
        if !self.sessions.contains_key(&conn_id) {
            return None;
        }

        match self.by_device.insert(device_id.to_string(), conn_id) {
            Some(old) if old != conn_id => Some(old),
            _ => None,
        }
    }

    /// Remove a session and every index entry pointing at it.
    pub fn remove(&mut self, conn_id: u64) -> Option<DeviceSession<I>> {
        let session = self.sessions.remove(&conn_id)?;

        if let Some(device_id) = session.device_id()
            && self.by_device.get(device_id) == Some(&conn_id)
        {
            self.by_device.remove(device_id);
        }
        if let Some(iccid) = session.iccid()
            && self.by_iccid.get(iccid) == Some(&conn_id)
        {
            self.by_iccid.remove(iccid);
        }

        Some(session)
    }

    /// All live connection ids.
    #[must_use]
    pub fn conn_ids(&self) -> Vec<u64> {
        self.sessions.keys().copied().collect()
    }

    /// Snapshot of one session by connection id.
    #[must_use]
    pub fn snapshot(&self, conn_id: u64) -> Option<SessionSnapshot> {
        self.sessions.get(&conn_id).map(DeviceSession::snapshot)
    }

    /// Snapshot of one session by device id.
    #[must_use]
    pub fn snapshot_by_device(&self, device_id: &str) -> Option<SessionSnapshot> {
        self.conn_by_device(device_id).and_then(|conn_id| self.snapshot(conn_id))
    }

    /// Snapshots of every live session.
    #[must_use]
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions.values().map(DeviceSession::snapshot).collect()
    }

    /// Session count per state, for the status surface.
    #[must_use]
    pub fn counts_by_state(&self) -> std::collections::BTreeMap<&'static str, usize> {
        let mut counts = std::collections::BTreeMap::new();
        for session in self.sessions.values() {
            *counts.entry(session.state().as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Number of sessions in a given state.
    #[must_use]
    pub fn count_in_state(&self, state: DeviceState) -> usize {
        self.sessions.values().filter(|s| s.state() == state).count()
    }
}
