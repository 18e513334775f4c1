//! The channel driver.
//!
//! A [`Channel`] owns one physical byte stream and multiplexes any number of
//! station sessions over it. It performs no I/O and reads no clock: every
//! entry point takes `now` from the caller and returns the side effects it
//! wants as [`ChannelEvent`]s, which makes the whole engine deterministic
//! under test.
//!
//! Concurrency model: all state lives behind one mutex, locked for the
//! duration of each entry point. Completion callbacks run under that lock;
//! reentrant cancellation from inside a callback therefore goes through the
//! [`CompletionCtx`] the callback is handed and is applied after it returns.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use dnp3_core::constants::APP_FUNC_CONFIRM;
use dnp3_core::control::{ControlField, PrimaryFunction, SecondaryFunction};
use dnp3_core::frame::{build_frame, FrameHeader};
use dnp3_core::types::{LinkAddress, SessionId};
use dnp3_link::{
    ConfirmAction, Keepalive, LinkRxParser, LinkSession, LinkTx, ReceivedFrame, RetryDecision,
    RxEvent, RxStats, SendOutcome, SessionAction, TxKind, TxState,
};
use dnp3_transport::{Reassembler, SegmentOutcome, Segmenter};

use crate::config::{ChannelConfig, ConfirmMode, ReassemblyMode};
use crate::dispatcher::{rotation, Dispatcher};
use crate::error::ChannelError;
use crate::events::{ChannelEvent, ChannelStats, TxToken};
use crate::hooks::SessionHooks;
use crate::queue::{ChannelQueue, EnqueueRejected, QueuedRequest};
use crate::request::{CompletionCtx, RequestId, ResponseInfo, TxRequest, TxStatus};

/// Per-session state: link protocol state plus the keepalive timer.
#[derive(Debug)]
struct SessionState {
    link: LinkSession,
    keepalive: Keepalive,
}

/// Reassembly buffers, shared or per session according to configuration.
#[derive(Debug)]
enum ReassemblyStore {
    PerChannel(Reassembler),
    PerSession {
        max_fragment: usize,
        map: HashMap<SessionId, Reassembler>,
    },
}

impl ReassemblyStore {
    fn new(mode: ReassemblyMode, max_fragment: usize) -> Self {
        match mode {
            ReassemblyMode::PerChannel => Self::PerChannel(Reassembler::new(max_fragment)),
            ReassemblyMode::PerSession => Self::PerSession {
                max_fragment,
                map: HashMap::new(),
            },
        }
    }

    fn get(&mut self, session: SessionId) -> &mut Reassembler {
        match self {
            Self::PerChannel(r) => r,
            Self::PerSession { max_fragment, map } => map
                .entry(session)
                .or_insert_with(|| Reassembler::new(*max_fragment)),
        }
    }

    fn forget(&mut self, session: SessionId) {
        match self {
            Self::PerChannel(r) => r.reset(),
            Self::PerSession { map, .. } => {
                map.remove(&session);
            }
        }
    }
}

/// The fragment currently being transmitted, one segment at a time.
#[derive(Debug)]
struct InFlight {
    request_id: RequestId,
    session: SessionId,
    segments: VecDeque<Vec<u8>>,
    /// Segment staged at the link layer; retained until delivery so the
    /// reset-then-retry path can re-stage it.
    current: Option<Vec<u8>>,
    confirmed: bool,
    broadcast: bool,
}

struct ChannelInner {
    config: ChannelConfig,
    hooks: Box<dyn SessionHooks>,
    sessions: BTreeMap<SessionId, SessionState>,
    queue: ChannelQueue,
    dispatcher: Dispatcher,
    rx: LinkRxParser,
    tx: LinkTx,
    segmenter: Segmenter,
    reassembly: ReassemblyStore,
    in_flight: Option<InFlight>,
    /// Token of the tracked (retryable) transmit awaiting physical
    /// completion; reply transmits are fire-and-forget.
    primary_token: Option<TxToken>,
    next_request_id: u64,
    next_token: u64,
    confirm_deadline: Option<Instant>,
    incremental_deadline: Option<Instant>,
    open: bool,
    stats: ChannelStats,
}

/// A multiplexed transmission channel over one byte stream.
pub struct Channel {
    inner: Mutex<ChannelInner>,
}

impl Channel {
    pub fn new(
        config: ChannelConfig,
        hooks: Box<dyn SessionHooks>,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        let inner = ChannelInner {
            rx: LinkRxParser::new(config.segment_budget()),
            queue: ChannelQueue::new(config.max_queue_depth, config.tx_fragment_size),
            reassembly: ReassemblyStore::new(config.reassembly_mode, config.rx_fragment_size),
            hooks,
            sessions: BTreeMap::new(),
            dispatcher: Dispatcher::new(),
            tx: LinkTx::new(),
            segmenter: Segmenter::new(),
            in_flight: None,
            primary_token: None,
            next_request_id: 0,
            next_token: 0,
            confirm_deadline: None,
            incremental_deadline: None,
            open: false,
            stats: ChannelStats::default(),
            config,
        };
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session toward the station at `address`.
    pub fn open_session(
        &self,
        id: SessionId,
        address: LinkAddress,
        now: Instant,
    ) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        if inner.sessions.contains_key(&id) {
            return Err(ChannelError::DuplicateSession(id));
        }
        inner.insert_session(id, address, now);
        Ok(())
    }

    /// Close a session: every queued request for it completes as canceled,
    /// its reassembly state is dropped, and the round-robin cursor is
    /// invalidated if it pointed here.
    pub fn close_session(
        &self,
        id: SessionId,
        now: Instant,
    ) -> Result<Vec<ChannelEvent>, ChannelError> {
        let mut inner = self.lock();
        if inner.sessions.remove(&id).is_none() {
            return Err(ChannelError::UnknownSession(id));
        }
        let mut events = Vec::new();
        inner.purge_session(id, &mut events);
        inner.dispatcher.session_closed(id);
        inner.reassembly.forget(id);
        inner.try_send(now, &mut events);
        Ok(events)
    }

    /// Queue a request for transmission. On rejection the request is handed
    /// back to the caller inside the error.
    pub fn enqueue(
        &self,
        request: TxRequest,
        now: Instant,
    ) -> Result<(RequestId, Vec<ChannelEvent>), EnqueueRejected> {
        self.lock().enqueue(request, now)
    }

    /// Cancel a queued request; it completes with [`TxStatus::Canceled`].
    pub fn cancel(
        &self,
        id: RequestId,
        now: Instant,
    ) -> Result<Vec<ChannelEvent>, ChannelError> {
        let mut inner = self.lock();
        let mut events = Vec::new();
        if !inner.cancel_request(id, &mut events) {
            return Err(ChannelError::UnknownRequest(id));
        }
        inner.try_send(now, &mut events);
        Ok(events)
    }

    /// Cancel every queued request for `session` without closing it.
    pub fn delete_all_for_session(
        &self,
        session: SessionId,
        now: Instant,
    ) -> Result<Vec<ChannelEvent>, ChannelError> {
        let mut inner = self.lock();
        if !inner.sessions.contains_key(&session) {
            return Err(ChannelError::UnknownSession(session));
        }
        let mut events = Vec::new();
        inner.purge_session(session, &mut events);
        inner.try_send(now, &mut events);
        Ok(events)
    }

    /// Replace the channel configuration at runtime.
    pub fn modify_config(
        &self,
        config: ChannelConfig,
        now: Instant,
    ) -> Result<(), ChannelError> {
        config.validate()?;
        let mut inner = self.lock();
        inner.apply_config(config, now);
        Ok(())
    }

    /// Report the physical transport coming up or going down.
    pub fn set_open(&self, open: bool, now: Instant) -> Vec<ChannelEvent> {
        let mut inner = self.lock();
        let mut events = Vec::new();
        if inner.open == open {
            return events;
        }
        inner.open = open;
        if open {
            for state in inner.sessions.values_mut() {
                state.keepalive.restart(now);
            }
            inner.try_send(now, &mut events);
        } else {
            inner.on_transport_lost(now, &mut events);
        }
        events
    }

    /// Feed bytes received from the physical layer.
    pub fn on_bytes(&self, bytes: &[u8], now: Instant) -> Vec<ChannelEvent> {
        let mut inner = self.lock();
        let mut events = Vec::new();
        inner.on_bytes(bytes, now, &mut events);
        inner.try_send(now, &mut events);
        events
    }

    /// The physical layer finished writing the bytes of `token`.
    pub fn on_transmit_done(&self, token: TxToken, now: Instant) -> Vec<ChannelEvent> {
        let mut inner = self.lock();
        let mut events = Vec::new();
        inner.on_transmit_done(token, now, &mut events);
        events
    }

    /// The physical layer failed to write the bytes of `token`.
    pub fn on_transmit_failed(&self, token: TxToken, now: Instant) -> Vec<ChannelEvent> {
        let mut inner = self.lock();
        let mut events = Vec::new();
        inner.on_transmit_failed(token, now, &mut events);
        events
    }

    /// Drive every expired timer. Call at or before
    /// [`next_deadline`](Self::next_deadline).
    pub fn poll_timers(&self, now: Instant) -> Vec<ChannelEvent> {
        let mut inner = self.lock();
        let mut events = Vec::new();
        inner.poll_timers(now, &mut events);
        events
    }

    /// Earliest instant any timer can fire.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().next_deadline()
    }

    pub fn stats(&self) -> ChannelStats {
        self.lock().stats
    }

    pub fn rx_stats(&self) -> RxStats {
        self.lock().rx.stats()
    }

    /// Number of queued (including outstanding) requests.
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }
}

impl ChannelInner {
    fn local_address(&self) -> LinkAddress {
        LinkAddress::new(self.config.local_address)
    }

    fn insert_session(&mut self, id: SessionId, address: LinkAddress, now: Instant) {
        tracing::info!(session = %id, %address, "session opened");
        self.sessions.insert(
            id,
            SessionState {
                link: LinkSession::new(address),
                keepalive: Keepalive::new(self.config.keepalive_period, now),
            },
        );
    }

    fn session_id_by_address(&self, address: LinkAddress) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.link.address() == address)
            .map(|(id, _)| *id)
    }

    fn apply_config(&mut self, config: ChannelConfig, now: Instant) {
        if config.max_frame_size != self.config.max_frame_size {
            self.rx = LinkRxParser::new(config.segment_budget());
        }
        if config.rx_fragment_size != self.config.rx_fragment_size
            || config.reassembly_mode != self.config.reassembly_mode
        {
            self.reassembly =
                ReassemblyStore::new(config.reassembly_mode, config.rx_fragment_size);
        }
        if config.keepalive_period != self.config.keepalive_period {
            for state in self.sessions.values_mut() {
                state.keepalive = Keepalive::new(config.keepalive_period, now);
            }
        }
        self.queue
            .set_limits(config.max_queue_depth, config.tx_fragment_size);
        tracing::info!("channel configuration replaced");
        self.config = config;
    }

    fn on_transport_lost(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        // Unsent queued requests survive; anything at the link layer does
        // not, and a partially transmitted fragment cannot be resumed.
        let interrupted = self.in_flight.as_ref().map(|fl| (fl.request_id, fl.session));
        if let Some((request_id, session)) = interrupted {
            tracing::debug!(request = ?request_id, "transport lost mid-fragment");
            if let Some(state) = self.sessions.get_mut(&session) {
                state.link.on_confirm_failed();
            }
            self.fail_in_flight(TxStatus::Failure, now, events);
        }
        self.tx.abandon();
        self.primary_token = None;
        self.confirm_deadline = None;
        self.incremental_deadline = None;
    }

    // ------------------------------------------------------------------ //
    // Enqueue, cancel, complete
    // ------------------------------------------------------------------ //

    fn enqueue(
        &mut self,
        request: TxRequest,
        now: Instant,
    ) -> Result<(RequestId, Vec<ChannelEvent>), EnqueueRejected> {
        if !self.sessions.contains_key(&request.session) {
            let session = request.session;
            return Err(EnqueueRejected {
                request,
                error: ChannelError::UnknownSession(session),
            });
        }
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        let deadline = (!request.response_timeout.is_zero())
            .then(|| now + request.response_timeout);
        let displaced = self.queue.insert(QueuedRequest {
            id,
            request,
            sent: false,
            deadline,
        })?;

        let mut events = Vec::new();
        if let Some(old) = displaced {
            self.stats.duplicates_replaced += 1;
            self.complete_entry(old, TxStatus::Canceled, &mut events);
        }
        self.stats.requests_enqueued += 1;
        tracing::trace!(request = ?id, queued = self.queue.len(), "request enqueued");
        self.try_send(now, &mut events);
        Ok((id, events))
    }

    /// Remove `id` wherever it is and complete it as canceled. Returns
    /// false if no such request is queued.
    fn cancel_request(&mut self, id: RequestId, events: &mut Vec<ChannelEvent>) -> bool {
        let Some(entry) = self.queue.remove(id) else {
            return false;
        };
        if self.in_flight.as_ref().is_some_and(|fl| fl.request_id == id) {
            self.abort_in_flight();
        }
        self.complete_entry(entry, TxStatus::Canceled, events);
        true
    }

    /// Drop the in-flight fragment and whatever the link layer holds for it.
    fn abort_in_flight(&mut self) {
        let Some(fl) = self.in_flight.take() else {
            return;
        };
        self.incremental_deadline = None;
        if !fl.broadcast {
            if self.tx.state() == TxState::AwaitingConfirm {
                // The peer's view of the exchange is now unknown.
                if let Some(state) = self.sessions.get_mut(&fl.session) {
                    state.link.on_confirm_failed();
                }
            }
            self.tx.abandon();
            self.confirm_deadline = None;
        }
    }

    /// Terminal completion: bookkeeping, hooks, user callback, deferred
    /// cancellations.
    fn complete_entry(
        &mut self,
        entry: QueuedRequest,
        status: TxStatus,
        events: &mut Vec<ChannelEvent>,
    ) {
        self.dispatcher.on_complete(entry.request.session, entry.id);
        self.stats.requests_completed += 1;
        match status {
            TxStatus::Timeout => self.stats.requests_timed_out += 1,
            TxStatus::Canceled => self.stats.requests_canceled += 1,
            TxStatus::Failure | TxStatus::Mismatch => self.stats.requests_failed += 1,
            TxStatus::Success => {}
        }
        let mut request = entry.request;
        let info = ResponseInfo {
            id: entry.id,
            session: request.session,
            status,
            payload: std::mem::take(&mut request.payload),
            priority: request.priority,
            flags: request.flags,
        };
        tracing::debug!(request = ?info.id, session = %info.session, ?status,
            "request complete");
        self.hooks.on_request_complete(&info);
        if let Some(mut handler) = request.on_complete.take() {
            let mut ctx = CompletionCtx::default();
            handler(&mut ctx, &info);
            for id in ctx.take_cancels() {
                // Already-completed ids are a no-op; each live one removes a
                // queue entry, so the cascade terminates.
                self.cancel_request(id, events);
            }
        }
        events.push(ChannelEvent::RequestComplete(info));
    }

    fn purge_session(&mut self, session: SessionId, events: &mut Vec<ChannelEvent>) {
        if self
            .in_flight
            .as_ref()
            .is_some_and(|fl| fl.session == session)
        {
            self.abort_in_flight();
        }
        for entry in self.queue.remove_session(session) {
            self.complete_entry(entry, TxStatus::Canceled, events);
        }
    }

    // ------------------------------------------------------------------ //
    // Dispatch and transmission
    // ------------------------------------------------------------------ //

    fn try_send(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        if !self.open
            || self.in_flight.is_some()
            || !self.tx.is_idle()
            || self.primary_token.is_some()
            || self.queue.is_empty()
        {
            return;
        }
        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in rotation(&sessions, self.dispatcher.last_tx_session()) {
            let ok = self.hooks.ok_to_send(session);
            let Some(selection) = self
                .dispatcher
                .select_for_session(&self.queue, session, now, ok)
            else {
                continue;
            };
            let Some(entry) = self.queue.get_mut(selection.id) else {
                continue;
            };
            self.hooks.prepare(session, &mut entry.request.payload);
            entry.sent = true;
            let payload = entry.request.payload.clone();
            let broadcast = entry.request.flags.broadcast;

            let budget = self.config.segment_budget();
            let segments = match self.segmenter.segment(&payload, budget) {
                Ok(segments) => segments,
                Err(err) => {
                    tracing::warn!(request = ?selection.id, %err, "segmentation failed");
                    if let Some(entry) = self.queue.remove(selection.id) {
                        self.complete_entry(entry, TxStatus::Failure, events);
                    }
                    continue;
                }
            };
            let confirmed = !broadcast
                && match self.config.confirm_mode {
                    ConfirmMode::Never => false,
                    ConfirmMode::Always => true,
                    ConfirmMode::Sometimes => segments.len() > 1,
                };
            self.dispatcher.on_sent(session, selection.id, selection.bypass);
            self.in_flight = Some(InFlight {
                request_id: selection.id,
                session,
                segments: segments.into(),
                current: None,
                confirmed,
                broadcast,
            });
            if !self.config.incremental_timeout.is_zero() {
                self.incremental_deadline = Some(now + self.config.incremental_timeout);
            }
            self.send_current_segment(now, events);
            return;
        }
    }

    /// Stage the current (or next) segment of the in-flight fragment at the
    /// link layer.
    fn send_current_segment(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        let Some(fl) = self.in_flight.as_mut() else {
            self.try_send(now, events);
            return;
        };
        if fl.current.is_none() {
            fl.current = fl.segments.pop_front();
        }
        let Some(segment) = fl.current.clone() else {
            return;
        };
        let session = fl.session;
        let confirmed = fl.confirmed;
        let broadcast = fl.broadcast;
        let local = self.local_address();

        if broadcast {
            let control = ControlField::primary(
                self.config.is_master,
                PrimaryFunction::UnconfirmedUserData,
                false,
                false,
            );
            let destination = LinkAddress::new(LinkAddress::BROADCAST_MIN);
            match build_frame(control, destination, local, &segment) {
                Ok(bytes) => self.emit_primary(bytes, events),
                Err(err) => {
                    tracing::warn!(%err, "broadcast frame build failed");
                    self.fail_in_flight(TxStatus::Failure, now, events);
                }
            }
            return;
        }

        let Some(state) = self.sessions.get_mut(&session) else {
            self.fail_in_flight(TxStatus::Failure, now, events);
            return;
        };
        match self.tx.send_user_data(
            &mut state.link,
            self.config.is_master,
            local,
            &segment,
            confirmed,
        ) {
            Ok(SendOutcome::Frame(bytes)) | Ok(SendOutcome::ResetFirst(bytes)) => {
                self.emit_primary(bytes, events);
            }
            Err(err) => {
                tracing::warn!(session = %session, %err, "link transmit failed");
                self.fail_in_flight(TxStatus::Failure, now, events);
            }
        }
    }

    fn emit_primary(&mut self, bytes: Vec<u8>, events: &mut Vec<ChannelEvent>) {
        let token = self.next_tx_token();
        self.primary_token = Some(token);
        events.push(ChannelEvent::TransmitBytes { token, bytes });
    }

    fn emit_reply(&mut self, bytes: Vec<u8>, events: &mut Vec<ChannelEvent>) {
        let token = self.next_tx_token();
        events.push(ChannelEvent::TransmitBytes { token, bytes });
    }

    fn next_tx_token(&mut self) -> TxToken {
        let token = TxToken(self.next_token);
        self.next_token += 1;
        token
    }

    fn on_transmit_done(&mut self, token: TxToken, now: Instant, events: &mut Vec<ChannelEvent>) {
        if self.primary_token != Some(token) {
            return; // a fire-and-forget reply finished
        }
        self.primary_token = None;
        if let Some(session) = self.in_flight.as_ref().map(|fl| fl.session) {
            if let Some(state) = self.sessions.get_mut(&session) {
                state.keepalive.restart(now);
            }
        }
        if self.in_flight.as_ref().is_some_and(|fl| fl.broadcast) {
            self.on_segment_delivered(now, events);
            return;
        }
        if self.tx.on_transmitted() {
            self.confirm_deadline = Some(now + self.config.confirm_timeout);
        } else {
            // Unconfirmed user data counts as delivered once written.
            self.on_segment_delivered(now, events);
        }
    }

    fn on_transmit_failed(
        &mut self,
        token: TxToken,
        now: Instant,
        events: &mut Vec<ChannelEvent>,
    ) {
        if self.primary_token != Some(token) {
            return;
        }
        self.primary_token = None;
        tracing::warn!("physical transmit failed");
        if self.in_flight.is_some() {
            self.fail_in_flight(TxStatus::Failure, now, events);
        } else {
            // Keepalive probe or link housekeeping frame.
            self.tx.abandon();
            self.confirm_deadline = None;
            self.try_send(now, events);
        }
    }

    /// A data segment is known delivered (written, for unconfirmed and
    /// broadcast sends; acknowledged, for confirmed sends).
    fn on_segment_delivered(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        let Some(fl) = self.in_flight.as_mut() else {
            self.try_send(now, events);
            return;
        };
        fl.current = None;
        if !fl.segments.is_empty() {
            if !self.config.incremental_timeout.is_zero() {
                self.incremental_deadline = Some(now + self.config.incremental_timeout);
            }
            self.send_current_segment(now, events);
            return;
        }

        // Fragment fully transmitted.
        let fl = match self.in_flight.take() {
            Some(fl) => fl,
            None => return,
        };
        self.incremental_deadline = None;
        self.stats.fragments_tx += 1;
        tracing::debug!(request = ?fl.request_id, session = %fl.session,
            "fragment transmitted");
        if let Some(entry) = self.queue.get_mut(fl.request_id) {
            // Confirm and authentication traffic dispatches as bypass and
            // never holds the outstanding slot, so no response can ever be
            // matched to it: it finishes at delivery.
            let finished = entry.request.flags.no_response
                || entry.request.is_confirm()
                || entry.request.flags.auth;
            if finished {
                if let Some(entry) = self.queue.remove(fl.request_id) {
                    self.complete_entry(entry, TxStatus::Success, events);
                }
            }
            // Otherwise the request stays queued as sent, awaiting its
            // response or its response deadline.
        }
        self.try_send(now, events);
    }

    fn fail_in_flight(
        &mut self,
        status: TxStatus,
        now: Instant,
        events: &mut Vec<ChannelEvent>,
    ) {
        let Some(fl) = self.in_flight.take() else {
            self.try_send(now, events);
            return;
        };
        self.incremental_deadline = None;
        self.confirm_deadline = None;
        self.tx.abandon();
        if let Some(entry) = self.queue.remove(fl.request_id) {
            self.complete_entry(entry, status, events);
        }
        self.try_send(now, events);
    }

    // ------------------------------------------------------------------ //
    // Receive path
    // ------------------------------------------------------------------ //

    fn on_bytes(&mut self, bytes: &[u8], now: Instant, events: &mut Vec<ChannelEvent>) {
        // Feed the parser in needed_bytes-sized steps so a frame addressed
        // elsewhere can be switched to discard mode before its body buffers.
        let mut offset = 0;
        while offset < bytes.len() {
            let take = self
                .rx
                .needed_bytes()
                .max(1)
                .min(bytes.len() - offset);
            let rx_events = self.rx.parse_bytes(&bytes[offset..offset + take], now);
            offset += take;
            for rx_event in rx_events {
                match rx_event {
                    RxEvent::Header(header) => self.on_rx_header(&header),
                    RxEvent::Frame(frame) => self.on_rx_frame(frame, now, events),
                }
            }
        }
    }

    fn accepts_destination(&self, destination: LinkAddress) -> bool {
        destination.raw() == self.config.local_address
            || (self.config.accept_self_address && destination.is_self_address())
            || destination.is_broadcast()
    }

    fn on_rx_header(&mut self, header: &FrameHeader) {
        if !self.accepts_destination(header.destination) {
            self.stats.frames_not_addressed_here += 1;
            self.rx
                .discard_current(dnp3_link::RxDiscardReason::NotAddressedHere);
        }
    }

    fn on_rx_frame(
        &mut self,
        frame: ReceivedFrame,
        now: Instant,
        events: &mut Vec<ChannelEvent>,
    ) {
        let header = frame.header;
        if !self.accepts_destination(header.destination) {
            self.stats.frames_not_addressed_here += 1;
            return;
        }
        let session = match self.session_id_by_address(header.source) {
            Some(id) => id,
            None => match self.hooks.auto_open(header.source) {
                Some(id) if !self.sessions.contains_key(&id) => {
                    self.insert_session(id, header.source, now);
                    id
                }
                _ => {
                    tracing::debug!(source = %header.source, "frame from unknown station");
                    self.stats.frames_not_addressed_here += 1;
                    return;
                }
            },
        };
        if let Some(state) = self.sessions.get_mut(&session) {
            // Any valid frame is evidence of link liveness.
            state.keepalive.restart(now);
        }

        if header.control.prm {
            self.on_primary_frame(session, header, frame.user_data, events);
        } else {
            self.on_secondary_frame(session, header.source, header.control, now, events);
        }
    }

    fn on_primary_frame(
        &mut self,
        session: SessionId,
        header: FrameHeader,
        user_data: Vec<u8>,
        events: &mut Vec<ChannelEvent>,
    ) {
        let broadcast = header.destination.is_broadcast();
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };
        let remote = state.link.address();
        let action = state.link.on_primary_frame(header.control, broadcast, user_data);
        let dir = self.config.is_master;
        let local = self.local_address();
        match action {
            SessionAction::Reply(function) => {
                self.send_secondary_reply(dir, function, local, remote, events);
            }
            SessionAction::ReplyLinkStatus => {
                match LinkTx::build_status_reply(dir, local, remote) {
                    Ok(bytes) => self.emit_reply(bytes, events),
                    Err(err) => tracing::warn!(%err, "status reply build failed"),
                }
            }
            SessionAction::Deliver(data) => {
                self.deliver_segment(session, &data, events);
            }
            SessionAction::DeliverAndReply(data, function) => {
                self.send_secondary_reply(dir, function, local, remote, events);
                self.deliver_segment(session, &data, events);
            }
            SessionAction::Ignore(reason) => {
                tracing::debug!(session = %session, ?reason, "primary frame ignored");
            }
        }
    }

    fn send_secondary_reply(
        &mut self,
        dir: bool,
        function: SecondaryFunction,
        local: LinkAddress,
        remote: LinkAddress,
        events: &mut Vec<ChannelEvent>,
    ) {
        match LinkTx::build_secondary_reply(dir, function, local, remote) {
            Ok(bytes) => self.emit_reply(bytes, events),
            Err(err) => tracing::warn!(%err, "secondary reply build failed"),
        }
    }

    fn on_secondary_frame(
        &mut self,
        session: SessionId,
        source: LinkAddress,
        control: ControlField,
        now: Instant,
        events: &mut Vec<ChannelEvent>,
    ) {
        let awaiting = self.tx.state() == TxState::AwaitingConfirm
            && self.tx.destination() == Some(source);
        if !awaiting {
            self.stats.unexpected_confirms += 1;
            tracing::trace!(session = %session, "secondary frame with nothing outstanding");
            return;
        }
        let kind = self.tx.current_kind();
        let function = match control.secondary_function() {
            Ok(function) => function,
            Err(err) => {
                tracing::debug!(session = %session, %err, "bad secondary function");
                self.stats.unexpected_confirms += 1;
                return;
            }
        };
        match function {
            SecondaryFunction::Ack => {
                if kind == Some(TxKind::RequestLinkStatus) {
                    self.stats.unexpected_confirms += 1;
                    return;
                }
                let Some(state) = self.sessions.get_mut(&session) else {
                    return;
                };
                let action = state.link.on_ack(kind == Some(TxKind::ResetLink));
                self.tx.confirm_received();
                self.confirm_deadline = None;
                match action {
                    ConfirmAction::ResetAcked => {
                        // The deferred data segment may now go out.
                        self.send_current_segment(now, events);
                    }
                    ConfirmAction::Delivered => {
                        self.on_segment_delivered(now, events);
                    }
                    _ => {}
                }
            }
            SecondaryFunction::Nack => {
                let reset_required = self.config.reset_on_nack;
                let Some(state) = self.sessions.get_mut(&session) else {
                    return;
                };
                let action = state.link.on_nack(reset_required);
                self.confirm_deadline = None;
                match action {
                    ConfirmAction::RetryDirect => match self.tx.on_confirm_timeout(self.config.max_retries) {
                        Ok(RetryDecision::Retransmit(bytes)) => {
                            self.emit_primary(bytes, events);
                        }
                        Ok(RetryDecision::Exhausted { .. }) | Err(_) => {
                            self.on_retries_exhausted(session, kind, now, events);
                        }
                    },
                    ConfirmAction::RetryWithReset => {
                        // Drop the staged frame; the next staging attempt
                        // leads with a fresh RESET_LINK.
                        self.tx.abandon();
                        self.send_current_segment(now, events);
                    }
                    _ => {}
                }
            }
            SecondaryFunction::LinkStatus => {
                if kind == Some(TxKind::RequestLinkStatus) {
                    if let Some(state) = self.sessions.get_mut(&session) {
                        state.link.on_link_status();
                        state.keepalive.restart(now);
                    }
                    self.tx.confirm_received();
                    self.confirm_deadline = None;
                    self.try_send(now, events);
                } else {
                    self.stats.unexpected_confirms += 1;
                }
            }
            SecondaryFunction::NotSupported => {
                // The peer refuses the service outright; retrying cannot help.
                tracing::warn!(session = %session, "peer answered NOT_SUPPORTED");
                self.tx.confirm_received();
                self.confirm_deadline = None;
                if let Some(state) = self.sessions.get_mut(&session) {
                    state.link.on_confirm_failed();
                }
                if kind == Some(TxKind::RequestLinkStatus) {
                    self.try_send(now, events);
                } else {
                    self.fail_in_flight(TxStatus::Failure, now, events);
                }
            }
        }
    }

    fn deliver_segment(
        &mut self,
        session: SessionId,
        segment: &[u8],
        events: &mut Vec<ChannelEvent>,
    ) {
        match self.reassembly.get(session).on_segment(session, segment) {
            SegmentOutcome::Complete(fragment) => {
                self.stats.fragments_rx += 1;
                self.on_fragment(session, fragment, events);
            }
            SegmentOutcome::Accepted
            | SegmentOutcome::SegmentDropped(_)
            | SegmentOutcome::FragmentDropped(_) => {}
        }
    }

    fn on_fragment(
        &mut self,
        session: SessionId,
        fragment: Vec<u8>,
        events: &mut Vec<ChannelEvent>,
    ) {
        let is_confirm = fragment.get(1) == Some(&APP_FUNC_CONFIRM);
        let mut completion = None;
        if !is_confirm {
            if let Some(id) = self.dispatcher.outstanding_for(session) {
                // A fragment only answers a fully transmitted request.
                let transmitted = !self
                    .in_flight
                    .as_ref()
                    .is_some_and(|fl| fl.request_id == id);
                if transmitted {
                    if let Some(entry) = self.queue.remove(id) {
                        self.dispatcher.on_response(session);
                        let status = if self.hooks.accept_response(session, &fragment) {
                            TxStatus::Success
                        } else {
                            TxStatus::Mismatch
                        };
                        completion = Some((entry, status));
                    }
                }
            }
        }
        events.push(ChannelEvent::FragmentReceived { session, fragment });
        if let Some((entry, status)) = completion {
            self.complete_entry(entry, status, events);
        }
    }

    // ------------------------------------------------------------------ //
    // Timers
    // ------------------------------------------------------------------ //

    fn poll_timers(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        self.poll_confirm_timer(now, events);
        self.poll_incremental_timer(now, events);
        self.poll_response_timers(now, events);
        self.poll_keepalives(now, events);
        self.try_send(now, events);
    }

    fn poll_confirm_timer(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        if !self.confirm_deadline.is_some_and(|d| d <= now) {
            return;
        }
        self.confirm_deadline = None;
        if !self.open {
            return;
        }
        let destination = self.tx.destination();
        let kind = self.tx.current_kind();
        match self.tx.on_confirm_timeout(self.config.max_retries) {
            Ok(RetryDecision::Retransmit(bytes)) => {
                // The confirm timer rearms when the retransmit is written.
                self.emit_primary(bytes, events);
            }
            Ok(RetryDecision::Exhausted { .. }) => {
                let session = destination.and_then(|a| self.session_id_by_address(a));
                if let Some(session) = session {
                    self.on_retries_exhausted(session, kind, now, events);
                }
            }
            Err(_) => {} // stale deadline, nothing staged
        }
    }

    fn on_retries_exhausted(
        &mut self,
        session: SessionId,
        kind: Option<TxKind>,
        now: Instant,
        events: &mut Vec<ChannelEvent>,
    ) {
        if let Some(state) = self.sessions.get_mut(&session) {
            state.link.on_confirm_failed();
            state.keepalive.restart(now);
        }
        self.tx.abandon();
        self.confirm_deadline = None;
        if kind == Some(TxKind::RequestLinkStatus) {
            // A dead keepalive probe marks the whole session offline.
            tracing::warn!(session = %session, "keepalive probe failed");
            self.dispatcher
                .set_offline(session, now + self.config.offline_delay);
            events.push(ChannelEvent::SessionOffline(session));
            if self.config.reopen_on_keepalive_failure {
                events.push(ChannelEvent::ReopenChannel);
            }
            self.try_send(now, events);
        } else {
            self.fail_in_flight(TxStatus::Failure, now, events);
        }
    }

    fn poll_incremental_timer(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        if !self.incremental_deadline.is_some_and(|d| d <= now) {
            return;
        }
        self.incremental_deadline = None;
        let Some(session) = self.in_flight.as_ref().map(|fl| fl.session) else {
            return;
        };
        tracing::warn!(session = %session, "incremental transmit timeout");
        // The session keeps the channel waiting; cool it down so the other
        // sessions get their turns.
        self.dispatcher
            .set_offline(session, now + self.config.offline_delay);
        self.abort_in_flight();
        // abort_in_flight leaves the queue entry in place; finish it.
        let expired: Vec<RequestId> = self
            .queue
            .iter()
            .filter(|e| e.sent && e.request.session == session)
            .map(|e| e.id)
            .collect();
        for id in expired {
            if let Some(entry) = self.queue.remove(id) {
                self.complete_entry(entry, TxStatus::Timeout, events);
            }
        }
    }

    fn poll_response_timers(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        for id in self.queue.expired(now) {
            let Some(entry) = self.queue.remove(id) else {
                continue;
            };
            let session = entry.request.session;
            let is_read = entry.request.is_read();
            if self.in_flight.as_ref().is_some_and(|fl| fl.request_id == id) {
                self.abort_in_flight();
            }
            self.complete_entry(entry, TxStatus::Timeout, events);
            if is_read
                && self
                    .dispatcher
                    .on_read_timeout(session, self.config.read_timeout_offline_threshold)
            {
                tracing::warn!(session = %session, "read timeouts exceeded threshold");
                self.dispatcher
                    .set_offline(session, now + self.config.offline_delay);
                events.push(ChannelEvent::SessionOffline(session));
            }
        }
    }

    fn poll_keepalives(&mut self, now: Instant, events: &mut Vec<ChannelEvent>) {
        if !self.open
            || self.in_flight.is_some()
            || !self.tx.is_idle()
            || self.primary_token.is_some()
        {
            return;
        }
        let due = self.sessions.iter().find_map(|(id, state)| {
            let eligible = state.keepalive.due(now, true) && !self.dispatcher.is_offline(*id, now);
            eligible.then(|| (*id, state.link.address()))
        });
        let Some((session, address)) = due else {
            return;
        };
        match self
            .tx
            .send_request_status(self.config.is_master, self.local_address(), address)
        {
            Ok(bytes) => {
                if let Some(state) = self.sessions.get_mut(&session) {
                    state.keepalive.restart(now);
                }
                self.stats.keepalives_sent += 1;
                tracing::debug!(session = %session, "keepalive probe");
                self.emit_primary(bytes, events);
            }
            Err(err) => {
                tracing::debug!(session = %session, %err, "keepalive skipped");
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let keepalive = self
            .sessions
            .values()
            .filter_map(|s| s.keepalive.next_deadline())
            .min();
        [
            self.confirm_deadline,
            self.incremental_deadline,
            self.queue.next_deadline(),
            keepalive,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}
