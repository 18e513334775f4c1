//! Priority-ordered request queue.
//!
//! Higher priorities dispatch first; equal priorities keep enqueue order.
//! An unsent request is replaced by a newly enqueued duplicate (same session,
//! same owner tag, equivalent payload); the replacement inherits the higher
//! of the two priorities and the displaced request is completed as canceled
//! by the channel.

use std::time::Instant;

use dnp3_core::types::SessionId;

use crate::error::ChannelError;
use crate::request::{RequestId, TxRequest};

/// A request with its queue bookkeeping.
#[derive(Debug)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub request: TxRequest,
    /// The request has been handed to the link layer at least once.
    pub sent: bool,
    /// Response-timer deadline, armed at enqueue.
    pub deadline: Option<Instant>,
}

/// A rejected enqueue, returning the request to the caller.
#[derive(Debug)]
pub struct EnqueueRejected {
    pub request: TxRequest,
    pub error: ChannelError,
}

#[derive(Debug, Default)]
pub struct ChannelQueue {
    entries: Vec<QueuedRequest>,
    max_depth: usize,
    max_fragment: usize,
}

impl ChannelQueue {
    pub fn new(max_depth: usize, max_fragment: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_depth,
            max_fragment,
        }
    }

    pub fn set_limits(&mut self, max_depth: usize, max_fragment: usize) {
        self.max_depth = max_depth;
        self.max_fragment = max_fragment;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert in priority order.
    ///
    /// Returns the displaced duplicate, if any, so the channel can complete
    /// it as canceled. On rejection the request comes back to the caller
    /// inside the error.
    pub fn insert(
        &mut self,
        mut entry: QueuedRequest,
    ) -> Result<Option<QueuedRequest>, EnqueueRejected> {
        if entry.request.payload.len() > self.max_fragment {
            return Err(EnqueueRejected {
                error: ChannelError::FragmentTooLarge {
                    len: entry.request.payload.len(),
                    max: self.max_fragment,
                },
                request: entry.request,
            });
        }

        let displaced = self.take_duplicate(&entry.request);
        if let Some(old) = &displaced {
            entry.request.priority = entry.request.priority.max(old.request.priority);
            tracing::debug!(
                old = ?old.id,
                new = ?entry.id,
                priority = entry.request.priority,
                "duplicate request replaced"
            );
        }

        if self.max_depth != 0 && self.entries.len() >= self.max_depth {
            return Err(EnqueueRejected {
                error: ChannelError::QueueFull {
                    depth: self.entries.len(),
                },
                request: entry.request,
            });
        }

        let position = self
            .entries
            .iter()
            .position(|e| e.request.priority < entry.request.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
        Ok(displaced)
    }

    /// Remove and return the unsent duplicate of `request`, if one exists.
    fn take_duplicate(&mut self, request: &TxRequest) -> Option<QueuedRequest> {
        let tag = request.owner_tag?;
        let position = self.entries.iter().position(|e| {
            !e.sent
                && e.request.session == request.session
                && e.request.owner_tag == Some(tag)
                && e.request.same_payload(request)
        })?;
        Some(self.entries.remove(position))
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut QueuedRequest> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: RequestId) -> Option<QueuedRequest> {
        let position = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(position))
    }

    /// Remove every request belonging to `session`, preserving queue order.
    pub fn remove_session(&mut self, session: SessionId) -> Vec<QueuedRequest> {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].request.session == session {
                removed.push(self.entries.remove(index));
            } else {
                index += 1;
            }
        }
        removed
    }

    /// Ids of requests whose response deadline has passed.
    pub fn expired(&self, now: Instant) -> Vec<RequestId> {
        self.entries
            .iter()
            .filter(|e| e.deadline.is_some_and(|d| d <= now))
            .map(|e| e.id)
            .collect()
    }

    /// Earliest armed response deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().filter_map(|e| e.deadline).min()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.entries.iter()
    }
}
