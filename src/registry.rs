//! Registry state
//!
//! The collection of live sessions plus server-wide counters. Every method
//! here runs inside the registry owner task (see `server`), so each call is
//! one serialized step: a uniqueness check and the name assignment it
//! guards, or a broadcast and the counter it bumps, can never interleave
//! with another session's mutation.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::session::{DeletedFlag, Session};
use crate::stats::{SessionStats, StatsSnapshot, Totals};
use crate::types::SessionId;

/// Result of a name claim during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameClaim {
    /// Name assigned, OK sent, ENTER broadcast
    Admitted,
    /// Another live session holds the name
    Taken,
    /// The claiming session is no longer registered
    UnknownSession,
}

/// Result of a KICK command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickOutcome {
    /// The named session was removed
    Kicked(SessionId),
    /// No live session has that name; nothing changed
    NoSuchTarget,
}

/// All live sessions keyed by id, plus registry-wide totals
///
/// Ids are assigned in insertion order, so walking the map backwards visits
/// the most recently inserted session first.
#[derive(Debug, Default)]
pub struct RegistryState {
    sessions: BTreeMap<SessionId, Session>,
    next_id: SessionId,
    totals: Totals,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection and assign its id
    pub fn insert(&mut self, sender: mpsc::UnboundedSender<ServerMessage>, deleted: DeletedFlag) -> SessionId {
        let id = self.next_id;
        self.next_id = id.next();
        self.sessions.insert(id, Session::new(id, sender, deleted));
        debug!("Session {} registered, {} live", id, self.sessions.len());
        id
    }

    /// Detach a session and mark it deleted; no-op if absent
    ///
    /// Dropping the returned session drops the registry's sender, which
    /// lets the session's writer task drain and close the stream.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        session.mark_deleted();
        debug!("Session {} removed, {} live", id, self.sessions.len());
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Number of registered sessions, named or not
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// False for an empty name or one already held by a live session
    pub fn is_name_unique(&self, name: &str) -> bool {
        !name.is_empty() && !self.sessions.values().any(|s| s.has_name(name))
    }

    /// Names of all live named sessions, ascending
    pub fn snapshot_sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_admitted())
            .filter_map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Queue a frame to every admitted session
    ///
    /// Every live peer gets the frame. A session whose writer task has
    /// already stopped is removed instead, and the others are told it left.
    pub fn broadcast(&mut self, msg: &ServerMessage) {
        let mut pending = vec![msg.clone()];
        while let Some(msg) = pending.pop() {
            let failed: Vec<SessionId> = self
                .sessions
                .values()
                .rev()
                .filter(|s| s.is_admitted())
                .filter(|s| !Self::deliver(s, msg.clone()))
                .map(|s| s.id)
                .collect();

            for id in failed {
                if let Some(name) = self.remove(id).and_then(|s| s.name) {
                    warn!("Writer for {} stopped, dropping session {}", name, id);
                    pending.push(ServerMessage::Leave(name));
                }
            }
        }
    }

    /// Queue one frame; false if the session's writer is gone
    fn deliver(session: &Session, msg: ServerMessage) -> bool {
        match session.send(msg) {
            Ok(()) => true,
            Err(SendError::ChannelClosed) => {
                debug!("Writer for {} already closed", session.display_name());
                false
            }
        }
    }

    /// Count one AUTH attempt, successful or not
    pub fn record_auth(&mut self) {
        self.totals.auth += 1;
    }

    /// Atomically check and assign a name, then announce the newcomer
    ///
    /// On success the claimant receives `OK:` before the `ENTER:` that is
    /// broadcast to every admitted session, itself included.
    pub fn claim_name(&mut self, id: SessionId, name: &str) -> NameClaim {
        if !self.is_name_unique(name) {
            return NameClaim::Taken;
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return NameClaim::UnknownSession;
        };
        if !Self::deliver(session, ServerMessage::Ok) {
            // Writer gone before admission; the handler's disconnect cleans up
            return NameClaim::UnknownSession;
        }
        session.set_name(name.to_string());
        self.totals.name += 1;
        self.broadcast(&ServerMessage::Enter(name.to_string()));
        NameClaim::Admitted
    }

    /// Count and fan out a chat line; returns the sender's name
    pub fn say(&mut self, id: SessionId, text: &str) -> Option<String> {
        let session = self.sessions.get_mut(&id).filter(|s| s.is_admitted())?;
        session.counters.say += 1;
        let name = session.name.clone()?;
        self.totals.say += 1;
        self.broadcast(&ServerMessage::Msg {
            name: name.clone(),
            text: text.to_string(),
        });
        Some(name)
    }

    /// Count a LIST request and reply to the requester only
    pub fn list(&mut self, id: SessionId) {
        let names = self.snapshot_sorted_names();
        let Some(session) = self.sessions.get_mut(&id).filter(|s| s.is_admitted()) else {
            return;
        };
        session.counters.list += 1;
        self.totals.list += 1;
        Self::deliver(session, ServerMessage::List(names));
    }

    /// Count a KICK and remove the live session named `target`, if any
    ///
    /// The victim is sent `KICK:` before its sender is dropped; the remaining
    /// sessions then see `LEAVE:<target>`.
    pub fn kick(&mut self, id: SessionId, target: &str) -> KickOutcome {
        if let Some(issuer) = self.sessions.get_mut(&id).filter(|s| s.is_admitted()) {
            issuer.counters.kick += 1;
            self.totals.kick += 1;
        }

        let Some(victim_id) = self
            .sessions
            .values()
            .find(|s| s.has_name(target))
            .map(|s| s.id)
        else {
            return KickOutcome::NoSuchTarget;
        };

        if let Some(victim) = self.remove(victim_id) {
            Self::deliver(&victim, ServerMessage::Kick);
        }
        self.broadcast(&ServerMessage::Leave(target.to_string()));
        KickOutcome::Kicked(victim_id)
    }

    /// Explicit LEAVE: announce to everyone (the leaver included), then remove
    pub fn leave(&mut self, id: SessionId) -> Option<String> {
        self.totals.leave += 1;
        let name = self
            .sessions
            .get(&id)
            .filter(|s| s.is_admitted())
            .and_then(|s| s.name.clone());
        if let Some(name) = &name {
            self.broadcast(&ServerMessage::Leave(name.clone()));
        }
        self.remove(id);
        name
    }

    /// Handler exit path: remove the session and tell the others it is gone
    ///
    /// No-op if the session was already removed by LEAVE or KICK.
    pub fn disconnect(&mut self, id: SessionId) -> Option<String> {
        let session = self.remove(id)?;
        let name = session.name?;
        self.broadcast(&ServerMessage::Leave(name.clone()));
        Some(name)
    }

    /// Per-session counters (sorted by name) and totals
    pub fn stats(&self) -> StatsSnapshot {
        let mut clients: Vec<SessionStats> = self
            .sessions
            .values()
            .filter(|s| s.is_admitted())
            .filter_map(|s| {
                s.name.clone().map(|name| SessionStats {
                    name,
                    counters: s.counters,
                })
            })
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        StatsSnapshot {
            clients,
            totals: self.totals,
        }
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(state: &mut RegistryState) -> (SessionId, DeletedFlag, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let flag = DeletedFlag::new();
        let id = state.insert(tx, flag.clone());
        (id, flag, rx)
    }

    fn join(state: &mut RegistryState, name: &str) -> (SessionId, DeletedFlag, mpsc::UnboundedReceiver<ServerMessage>) {
        let (id, flag, rx) = connect(state);
        assert_eq!(state.claim_name(id, name), NameClaim::Admitted);
        (id, flag, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            frames.push(msg);
        }
        frames
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut state = RegistryState::new();
        let (a, _, _rx_a) = connect(&mut state);
        state.remove(a);
        let (b, _, _rx_b) = connect(&mut state);
        assert!(b > a);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut state = RegistryState::new();
        let (_a, _, _rx) = connect(&mut state);
        assert!(state.remove(SessionId(99)).is_none());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_name_uniqueness() {
        let mut state = RegistryState::new();
        assert!(!state.is_name_unique(""));
        assert!(state.is_name_unique("al"));

        let (al, _, _rx) = join(&mut state, "al");
        assert!(!state.is_name_unique("al"));
        assert!(state.is_name_unique("al0"));

        state.remove(al);
        assert!(state.is_name_unique("al"));
    }

    #[test]
    fn test_claim_sends_ok_then_enter() {
        let mut state = RegistryState::new();
        let (_al, _, mut rx_al) = join(&mut state, "al");
        assert_eq!(
            drain(&mut rx_al),
            vec![ServerMessage::Ok, ServerMessage::Enter("al".to_string())]
        );

        let (_bob, _, mut rx_bob) = join(&mut state, "bob");
        assert_eq!(
            drain(&mut rx_bob),
            vec![ServerMessage::Ok, ServerMessage::Enter("bob".to_string())]
        );
        assert_eq!(drain(&mut rx_al), vec![ServerMessage::Enter("bob".to_string())]);
        assert_eq!(state.totals().name, 2);
    }

    #[test]
    fn test_claim_taken_name() {
        let mut state = RegistryState::new();
        let (_al, _, _rx) = join(&mut state, "al");
        let (other, _, mut rx_other) = connect(&mut state);

        assert_eq!(state.claim_name(other, "al"), NameClaim::Taken);
        assert!(drain(&mut rx_other).is_empty());
        assert_eq!(state.claim_name(other, "al0"), NameClaim::Admitted);
    }

    #[test]
    fn test_claim_for_unknown_session() {
        let mut state = RegistryState::new();
        assert_eq!(state.claim_name(SessionId(5), "al"), NameClaim::UnknownSession);
    }

    #[test]
    fn test_broadcast_skips_unadmitted_sessions() {
        let mut state = RegistryState::new();
        let (_al, _, mut rx_al) = join(&mut state, "al");
        let (_pending, _, mut rx_pending) = connect(&mut state);
        drain(&mut rx_al);

        state.broadcast(&ServerMessage::Leave("x".to_string()));
        assert_eq!(drain(&mut rx_al), vec![ServerMessage::Leave("x".to_string())]);
        assert!(drain(&mut rx_pending).is_empty());
    }

    #[test]
    fn test_say_reaches_everyone_including_sender() {
        let mut state = RegistryState::new();
        let (al, _, mut rx_al) = join(&mut state, "al");
        let (_bob, _, mut rx_bob) = join(&mut state, "bob");
        drain(&mut rx_al);
        drain(&mut rx_bob);

        assert_eq!(state.say(al, "hi").as_deref(), Some("al"));

        let expected = ServerMessage::Msg {
            name: "al".to_string(),
            text: "hi".to_string(),
        };
        assert_eq!(drain(&mut rx_al), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_bob), vec![expected]);
        assert_eq!(state.get(al).unwrap().counters.say, 1);
        assert_eq!(state.totals().say, 1);
    }

    #[test]
    fn test_say_burst_reaches_every_peer() {
        let mut state = RegistryState::new();
        let (al, _, mut rx_al) = join(&mut state, "al");
        let (_bob, _, mut rx_bob) = join(&mut state, "bob");
        drain(&mut rx_al);
        drain(&mut rx_bob);

        // Nobody reads while the burst is queued
        for n in 0..1000 {
            state.say(al, &format!("line {n}"));
        }

        let texts: Vec<String> = drain(&mut rx_bob)
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMessage::Msg { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts.len(), 1000);
        assert_eq!(texts[0], "line 0");
        assert_eq!(texts[999], "line 999");
        assert_eq!(drain(&mut rx_al).len(), 1000);
    }

    #[test]
    fn test_kick_delivered_after_burst() {
        let mut state = RegistryState::new();
        let (al, _, _rx_al) = join(&mut state, "al");
        let (_bob, _, mut rx_bob) = join(&mut state, "bob");
        drain(&mut rx_bob);

        for _ in 0..500 {
            state.say(al, "spam");
        }
        state.kick(al, "bob");

        let frames = drain(&mut rx_bob);
        assert_eq!(frames.len(), 501);
        assert_eq!(frames.last(), Some(&ServerMessage::Kick));
    }

    #[test]
    fn test_broadcast_drops_session_with_stopped_writer() {
        let mut state = RegistryState::new();
        let (al, _, mut rx_al) = join(&mut state, "al");
        let (bob, bob_flag, rx_bob) = join(&mut state, "bob");
        drain(&mut rx_al);
        drop(rx_bob);

        state.say(al, "hi");

        assert!(bob_flag.is_set());
        assert!(state.get(bob).is_none());
        assert_eq!(
            drain(&mut rx_al),
            vec![
                ServerMessage::Msg {
                    name: "al".to_string(),
                    text: "hi".to_string()
                },
                ServerMessage::Leave("bob".to_string()),
            ]
        );
        assert_eq!(state.totals().leave, 0);
    }

    #[test]
    fn test_say_not_delivered_to_departed() {
        let mut state = RegistryState::new();
        let (al, _, mut rx_al) = join(&mut state, "al");
        let (bob, _, mut rx_bob) = join(&mut state, "bob");
        state.leave(bob);
        drain(&mut rx_al);
        drain(&mut rx_bob);

        state.say(al, "anyone?");
        assert_eq!(drain(&mut rx_al).len(), 1);
        assert!(drain(&mut rx_bob).is_empty());
    }

    #[test]
    fn test_list_is_sorted_and_private() {
        let mut state = RegistryState::new();
        let (_zed, _, mut rx_zed) = join(&mut state, "zed");
        let (al, _, mut rx_al) = join(&mut state, "al");
        let (_pending, _, _rx) = connect(&mut state);
        drain(&mut rx_zed);
        drain(&mut rx_al);

        state.list(al);
        assert_eq!(
            drain(&mut rx_al),
            vec![ServerMessage::List(vec!["al".to_string(), "zed".to_string()])]
        );
        assert!(drain(&mut rx_zed).is_empty());
        assert_eq!(state.get(al).unwrap().counters.list, 1);
    }

    #[test]
    fn test_kick_removes_victim_and_announces() {
        let mut state = RegistryState::new();
        let (al, _, mut rx_al) = join(&mut state, "al");
        let (bob, bob_flag, mut rx_bob) = join(&mut state, "bob");
        let (_cy, _, mut rx_cy) = join(&mut state, "cy");
        drain(&mut rx_al);
        drain(&mut rx_bob);
        drain(&mut rx_cy);

        assert_eq!(state.kick(al, "bob"), KickOutcome::Kicked(bob));

        assert!(bob_flag.is_set());
        assert!(state.get(bob).is_none());
        assert_eq!(drain(&mut rx_bob), vec![ServerMessage::Kick]);
        assert_eq!(drain(&mut rx_al), vec![ServerMessage::Leave("bob".to_string())]);
        assert_eq!(drain(&mut rx_cy), vec![ServerMessage::Leave("bob".to_string())]);
        assert_eq!(state.get(al).unwrap().counters.kick, 1);
        assert_eq!(state.snapshot_sorted_names(), vec!["al", "cy"]);
    }

    #[test]
    fn test_kick_unknown_target_is_noop() {
        let mut state = RegistryState::new();
        let (al, _, mut rx_al) = join(&mut state, "al");
        let (_bob, _, mut rx_bob) = join(&mut state, "bob");
        drain(&mut rx_al);
        drain(&mut rx_bob);

        assert_eq!(state.kick(al, "nobody"), KickOutcome::NoSuchTarget);
        assert_eq!(state.kick(al, ""), KickOutcome::NoSuchTarget);

        assert_eq!(state.snapshot_sorted_names(), vec!["al", "bob"]);
        assert!(drain(&mut rx_al).is_empty());
        assert!(drain(&mut rx_bob).is_empty());
        assert_eq!(state.totals().kick, 2);
    }

    #[test]
    fn test_kick_self() {
        let mut state = RegistryState::new();
        let (al, al_flag, mut rx_al) = join(&mut state, "al");
        drain(&mut rx_al);

        assert_eq!(state.kick(al, "al"), KickOutcome::Kicked(al));
        assert!(al_flag.is_set());
        assert_eq!(drain(&mut rx_al), vec![ServerMessage::Kick]);
        assert!(state.is_empty());
    }

    #[test]
    fn test_leave_announces_to_leaver_too() {
        let mut state = RegistryState::new();
        let (al, al_flag, mut rx_al) = join(&mut state, "al");
        let (_bob, _, mut rx_bob) = join(&mut state, "bob");
        drain(&mut rx_al);
        drain(&mut rx_bob);

        assert_eq!(state.leave(al).as_deref(), Some("al"));
        assert!(al_flag.is_set());
        assert_eq!(drain(&mut rx_al), vec![ServerMessage::Leave("al".to_string())]);
        assert_eq!(drain(&mut rx_bob), vec![ServerMessage::Leave("al".to_string())]);
        assert_eq!(state.totals().leave, 1);
    }

    #[test]
    fn test_disconnect_after_leave_is_noop() {
        let mut state = RegistryState::new();
        let (al, _, _rx_al) = join(&mut state, "al");
        let (_bob, _, mut rx_bob) = join(&mut state, "bob");
        state.leave(al);
        drain(&mut rx_bob);

        assert!(state.disconnect(al).is_none());
        assert!(drain(&mut rx_bob).is_empty());
    }

    #[test]
    fn test_disconnect_unnamed_is_silent() {
        let mut state = RegistryState::new();
        let (_al, _, mut rx_al) = join(&mut state, "al");
        let (pending, _, _rx) = connect(&mut state);
        drain(&mut rx_al);

        assert!(state.disconnect(pending).is_none());
        assert!(drain(&mut rx_al).is_empty());
        assert_eq!(state.totals().leave, 0);
    }

    #[test]
    fn test_stats_snapshot() {
        let mut state = RegistryState::new();
        state.record_auth();
        state.record_auth();
        let (bob, _, _rx_bob) = join(&mut state, "bob");
        let (al, _, _rx_al) = join(&mut state, "al");
        state.say(al, "one");
        state.say(al, "two");
        state.list(bob);

        let stats = state.stats();
        let names: Vec<&str> = stats.clients.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["al", "bob"]);
        assert_eq!(stats.clients[0].counters.say, 2);
        assert_eq!(stats.clients[1].counters.list, 1);
        assert_eq!(stats.totals.auth, 2);
        assert_eq!(stats.totals.name, 2);
        assert_eq!(stats.totals.say, 2);
    }
}
