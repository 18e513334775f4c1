//! Request selection policy.
//!
//! The dispatcher decides which queued request transmits next. Sessions take
//! turns in a round-robin over the channel's open sessions, starting after
//! the one that transmitted last; within a session's turn the queue is
//! walked in priority order.
//!
//! A session with a request outstanding (sent, awaiting its response) is
//! skipped, as is a session inside its offline cool-down or one the
//! `ok_to_send` hook refuses. Two kinds of traffic bypass all three checks
//! and do not consume the round-robin turn: application CONFIRM fragments
//! and requests flagged as authentication traffic.

use std::collections::HashMap;
use std::time::Instant;

use dnp3_core::types::SessionId;

use crate::queue::ChannelQueue;
use crate::request::RequestId;

/// A selected request and how it was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub id: RequestId,
    /// Selected past the single-outstanding check; does not register as
    /// outstanding and does not advance the round-robin cursor.
    pub bypass: bool,
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    /// At most one outstanding (response-awaited) request per session.
    outstanding: HashMap<SessionId, RequestId>,
    /// Sessions in their post-failure cool-down.
    offline_until: HashMap<SessionId, Instant>,
    /// Consecutive read-request timeouts per session.
    read_timeouts: HashMap<SessionId, u32>,
    /// Round-robin cursor: the session whose turn was consumed last.
    last_tx_session: Option<SessionId>,
}

/// Iteration order for one dispatch pass: all of `sessions`, starting after
/// `last`. An unknown or absent `last` starts from the beginning.
pub fn rotation(sessions: &[SessionId], last: Option<SessionId>) -> Vec<SessionId> {
    let start = match last {
        Some(last) => sessions
            .iter()
            .position(|&s| s == last)
            .map_or(0, |i| (i + 1) % sessions.len()),
        None => 0,
    };
    let mut order = Vec::with_capacity(sessions.len());
    order.extend_from_slice(&sessions[start..]);
    order.extend_from_slice(&sessions[..start]);
    order
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn outstanding_for(&self, session: SessionId) -> Option<RequestId> {
        self.outstanding.get(&session).copied()
    }

    #[must_use]
    pub fn is_offline(&self, session: SessionId, now: Instant) -> bool {
        self.offline_until.get(&session).is_some_and(|&t| t > now)
    }

    #[must_use]
    pub fn last_tx_session(&self) -> Option<SessionId> {
        self.last_tx_session
    }

    /// Pick the next request for `session`'s turn, or `None` to pass.
    pub fn select_for_session(
        &self,
        queue: &ChannelQueue,
        session: SessionId,
        now: Instant,
        ok_to_send: bool,
    ) -> Option<Selection> {
        let blocked = self.outstanding.contains_key(&session)
            || self.is_offline(session, now)
            || !ok_to_send;
        for entry in queue.iter() {
            if entry.sent || entry.request.session != session {
                continue;
            }
            let bypass = entry.request.is_confirm() || entry.request.flags.auth;
            if bypass {
                return Some(Selection {
                    id: entry.id,
                    bypass: true,
                });
            }
            if !blocked {
                return Some(Selection {
                    id: entry.id,
                    bypass: false,
                });
            }
            // Blocked: keep scanning, bypass traffic further down may still go.
        }
        None
    }

    /// Record a dispatched request.
    pub fn on_sent(&mut self, session: SessionId, id: RequestId, bypass: bool) {
        if !bypass {
            self.outstanding.insert(session, id);
            self.last_tx_session = Some(session);
        }
    }

    /// Clear the outstanding slot if `id` holds it.
    pub fn on_complete(&mut self, session: SessionId, id: RequestId) {
        if self.outstanding.get(&session) == Some(&id) {
            self.outstanding.remove(&session);
        }
    }

    /// A response arrived: the session is demonstrably alive.
    pub fn on_response(&mut self, session: SessionId) {
        self.read_timeouts.remove(&session);
        self.offline_until.remove(&session);
    }

    /// Record a read-request timeout; returns true when the configured
    /// threshold is reached and the session should go offline.
    pub fn on_read_timeout(&mut self, session: SessionId, threshold: u32) -> bool {
        let count = self.read_timeouts.entry(session).or_insert(0);
        *count += 1;
        threshold != 0 && *count >= threshold
    }

    /// Start the offline cool-down for `session`.
    pub fn set_offline(&mut self, session: SessionId, until: Instant) {
        self.offline_until.insert(session, until);
    }

    /// Forget everything about a closed session. Invalidates the round-robin
    /// cursor if it pointed here, so the next pass starts from the top.
    pub fn session_closed(&mut self, session: SessionId) {
        self.outstanding.remove(&session);
        self.offline_until.remove(&session);
        self.read_timeouts.remove(&session);
        if self.last_tx_session == Some(session) {
            self.last_tx_session = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueuedRequest;
    use crate::request::TxRequest;

    fn sid(raw: u32) -> SessionId {
        SessionId::new(raw)
    }

    fn queue_with(entries: Vec<(u64, u32, u8, bool)>) -> ChannelQueue {
        // (id, session, priority, sent)
        let mut queue = ChannelQueue::new(0, 2048);
        for (id, session, priority, sent) in entries {
            let mut request = TxRequest::new(sid(session), vec![0xC0, 0x01]);
            request.priority = priority;
            queue
                .insert(QueuedRequest {
                    id: RequestId(id),
                    request,
                    sent: false,
                    deadline: None,
                })
                .unwrap();
            if sent {
                queue.get_mut(RequestId(id)).unwrap().sent = true;
            }
        }
        queue
    }

    #[test]
    fn rotation_starts_after_last() {
        let sessions = [sid(1), sid(2), sid(3)];
        assert_eq!(rotation(&sessions, None), vec![sid(1), sid(2), sid(3)]);
        assert_eq!(
            rotation(&sessions, Some(sid(1))),
            vec![sid(2), sid(3), sid(1)]
        );
        assert_eq!(
            rotation(&sessions, Some(sid(3))),
            vec![sid(1), sid(2), sid(3)]
        );
        // A closed (unknown) cursor falls back to the start.
        assert_eq!(
            rotation(&sessions, Some(sid(9))),
            vec![sid(1), sid(2), sid(3)]
        );
    }

    #[test]
    fn selects_highest_priority_unsent() {
        let queue = queue_with(vec![(1, 1, 1, false), (2, 1, 5, false), (3, 1, 5, true)]);
        let d = Dispatcher::new();
        let sel = d
            .select_for_session(&queue, sid(1), Instant::now(), true)
            .unwrap();
        assert_eq!(sel.id, RequestId(2));
        assert!(!sel.bypass);
    }

    #[test]
    fn outstanding_session_passes() {
        let queue = queue_with(vec![(1, 1, 0, false)]);
        let mut d = Dispatcher::new();
        d.on_sent(sid(1), RequestId(9), false);
        assert!(d
            .select_for_session(&queue, sid(1), Instant::now(), true)
            .is_none());
        d.on_complete(sid(1), RequestId(9));
        assert!(d
            .select_for_session(&queue, sid(1), Instant::now(), true)
            .is_some());
    }

    #[test]
    fn confirm_bypasses_outstanding() {
        let mut queue = ChannelQueue::new(0, 2048);
        let confirm = TxRequest::new(sid(1), vec![0xC1, 0x00]);
        queue
            .insert(QueuedRequest {
                id: RequestId(1),
                request: confirm,
                sent: false,
                deadline: None,
            })
            .unwrap();
        let mut d = Dispatcher::new();
        d.on_sent(sid(1), RequestId(9), false);
        let sel = d
            .select_for_session(&queue, sid(1), Instant::now(), true)
            .unwrap();
        assert_eq!(sel.id, RequestId(1));
        assert!(sel.bypass);
        // Bypass traffic does not move the cursor or the outstanding slot.
        d.on_sent(sid(1), RequestId(1), true);
        assert_eq!(d.outstanding_for(sid(1)), Some(RequestId(9)));
    }

    #[test]
    fn offline_cooldown_blocks_until_expiry() {
        let queue = queue_with(vec![(1, 1, 0, false)]);
        let mut d = Dispatcher::new();
        let now = Instant::now();
        d.set_offline(sid(1), now + std::time::Duration::from_secs(30));
        assert!(d.select_for_session(&queue, sid(1), now, true).is_none());
        let later = now + std::time::Duration::from_secs(31);
        assert!(d.select_for_session(&queue, sid(1), later, true).is_some());
    }

    #[test]
    fn ok_to_send_refusal_passes_turn() {
        let queue = queue_with(vec![(1, 1, 0, false)]);
        let d = Dispatcher::new();
        assert!(d
            .select_for_session(&queue, sid(1), Instant::now(), false)
            .is_none());
    }

    #[test]
    fn read_timeout_threshold() {
        let mut d = Dispatcher::new();
        assert!(!d.on_read_timeout(sid(1), 3));
        assert!(!d.on_read_timeout(sid(1), 3));
        assert!(d.on_read_timeout(sid(1), 3));
        // A response clears the run of timeouts.
        d.on_response(sid(1));
        assert!(!d.on_read_timeout(sid(1), 3));
        // Threshold zero disables the check entirely.
        let mut d2 = Dispatcher::new();
        for _ in 0..10 {
            assert!(!d2.on_read_timeout(sid(2), 0));
        }
    }

    #[test]
    fn session_close_invalidates_cursor() {
        let mut d = Dispatcher::new();
        d.on_sent(sid(2), RequestId(1), false);
        assert_eq!(d.last_tx_session(), Some(sid(2)));
        d.session_closed(sid(2));
        assert_eq!(d.last_tx_session(), None);
        assert_eq!(d.outstanding_for(sid(2)), None);
    }
}
