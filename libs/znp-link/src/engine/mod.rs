//! Transaction engine
//!
//! One task owns the gate, the transmit queue, the backlog set and the reset
//! state. Callers, timers, the reader and the writer talk to it through
//! `EngineMsg`; nothing else touches that state.
//!
//! # Flow
//!
//! - A request claims an idle gate and is dispatched at once, otherwise it
//!   waits in the queue.
//! - A synchronous request arms a hard timeout and a promotion timer. When
//!   the promotion timer fires while the request still holds the gate, its
//!   key goes into the backlog and the first queued request with a different
//!   key is sent alongside it.
//! - Settling a request sweeps the backlog entries that predate it, removes
//!   its own entry and, if it still held the gate, dequeues the next request.
//! - `SYS:resetReq` discards the queue and holds the gate until `resetInd`
//!   arrives or the fail-safe fires.
//!
//! Dequeued requests always reach dispatch through a message to the engine
//! itself, never by direct recursion.

mod backlog;
mod gate;
mod queue;

pub use gate::{Gate, Holder, TxnId};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use znp_protocol::{CommandSchema, MtCodec, MtFrame};

use crate::config::EngineConfig;
use crate::dispatcher::{Dispatcher, Inbound};
use crate::error::{CorrelationKey, Result, ZnpError};
use crate::events::ZnpEvent;
use crate::transport::{ConnectionState, DeviceStream, Transport};

use backlog::{Backlog, BacklogEntry};
use queue::TxQueue;

pub(crate) type Reply = oneshot::Sender<Result<Value>>;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnKind {
    /// SREQ, answered by an SRSP with the same key
    Sync,
    /// AREQ, no reply
    Async,
    /// `SYS:resetReq`, completed by `SYS:resetInd`
    Reset,
}

/// A built request on its way to the engine
pub(crate) struct Submission {
    pub key: CorrelationKey,
    pub name: String,
    pub kind: TxnKind,
    pub frame: MtFrame,
    pub reply: Reply,
}

pub(crate) struct Txn {
    id: TxnId,
    key: CorrelationKey,
    name: String,
    kind: TxnKind,
    frame: MtFrame,
    reply: Reply,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Timer {
    HardTimeout(TxnId),
    Promote(TxnId),
    ResetFailsafe(u64),
}

pub(crate) enum EngineMsg {
    Request(Submission),
    SendRaw {
        frame: MtFrame,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Deferred dispatch of a dequeued request
    Dispatch {
        epoch: u64,
        txn: Txn,
    },
    Timer(Timer),
    Inbound {
        session: u64,
        event: Inbound,
    },
    Attach {
        transport: Box<dyn Transport>,
        reply: oneshot::Sender<Result<()>>,
    },
    Opened {
        result: Result<DeviceStream>,
        replaced: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
    Closed {
        result: Result<()>,
    },
    TransportLost {
        session: u64,
        reason: String,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Shutdown,
}

// ============================================================================
// Introspection
// ============================================================================

/// Engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub requests_sent: u64,
    pub replies: u64,
    pub timeouts: u64,
    pub device_errors: u64,
    pub promotions: u64,
    pub unsolicited_replies: u64,
    pub discarded: u64,
    /// Backlog entries force-timed-out by a later transaction's settlement
    pub swept_backlog_entries: u64,
    /// Reset fail-safe releases
    pub reset_failsafe_fired: u64,
}

/// Point-in-time view of the engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub gate: Gate,
    pub queue_len: usize,
    pub backlog: Vec<CorrelationKey>,
    /// Keys of synchronous requests sent and not yet settled
    pub outstanding: Vec<CorrelationKey>,
    pub resetting: bool,
    /// Reset callers still waiting for `resetInd`
    pub reset_waiters: usize,
    pub stats: EngineStats,
}

// ============================================================================
// Engine
// ============================================================================

/// A synchronous request on the wire
struct InFlight {
    key: CorrelationKey,
    name: String,
    reply: Reply,
    start_backlog: Vec<BacklogEntry>,
    timeout: JoinHandle<()>,
    promote: Option<JoinHandle<()>>,
}

impl InFlight {
    fn cancel_timers(&self) {
        self.timeout.abort();
        if let Some(promote) = &self.promote {
            promote.abort();
        }
    }
}

struct Link {
    session: u64,
    writer: mpsc::UnboundedSender<MtFrame>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
}

pub(crate) struct Engine {
    config: EngineConfig,
    schema: Arc<dyn CommandSchema>,
    tx: mpsc::UnboundedSender<EngineMsg>,
    events: broadcast::Sender<ZnpEvent>,
    state: watch::Sender<ConnectionState>,

    link: Option<Link>,
    /// Incremented per attached stream
    session: u64,
    /// Incremented per close; stale deferred dispatches are dropped
    epoch: u64,
    connecting: bool,
    closing: Option<Vec<oneshot::Sender<Result<()>>>>,

    gate: Gate,
    queue: TxQueue<Txn>,
    backlog: Backlog,
    pending: HashMap<TxnId, InFlight>,
    next_id: u64,

    resetting: bool,
    reset_epoch: u64,
    reset_waiters: Vec<Reply>,
    reset_failsafe: Option<JoinHandle<()>>,

    stats: EngineStats,
}

impl Engine {
    /// Spawn the engine task and return its mailbox
    pub fn spawn(
        config: EngineConfig,
        schema: Arc<dyn CommandSchema>,
        events: broadcast::Sender<ZnpEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> mpsc::UnboundedSender<EngineMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine {
            config,
            schema,
            tx: tx.clone(),
            events,
            state,
            link: None,
            session: 0,
            epoch: 0,
            connecting: false,
            closing: None,
            gate: Gate::Idle,
            queue: TxQueue::default(),
            backlog: Backlog::default(),
            pending: HashMap::new(),
            next_id: 0,
            resetting: false,
            reset_epoch: 0,
            reset_waiters: Vec::new(),
            reset_failsafe: None,
            stats: EngineStats::default(),
        };
        tokio::spawn(engine.run(rx));
        tx
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                EngineMsg::Request(submission) => self.on_request(submission),
                EngineMsg::SendRaw { frame, reply } => {
                    let result = if self.link.is_some() {
                        self.write(frame);
                        Ok(())
                    } else {
                        Err(ZnpError::NotInitialized)
                    };
                    let _ = reply.send(result);
                },
                EngineMsg::Dispatch { epoch, txn } => self.on_dispatch(epoch, txn),
                EngineMsg::Timer(timer) => self.on_timer(timer),
                EngineMsg::Inbound { session, event } => {
                    if session == self.session && self.link.is_some() {
                        self.on_inbound(event);
                    }
                },
                EngineMsg::Attach { transport, reply } => self.on_attach(transport, reply),
                EngineMsg::Opened {
                    result,
                    replaced,
                    reply,
                } => self.on_opened(result, replaced, reply),
                EngineMsg::Close { reply } => self.on_close(reply),
                EngineMsg::Closed { result } => self.on_closed(result),
                EngineMsg::TransportLost { session, reason } => {
                    if self.link.as_ref().map(|l| l.session) == Some(session) {
                        error!("Transport lost: {}", reason);
                        self.begin_close();
                    }
                },
                EngineMsg::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                },
                EngineMsg::Shutdown => break,
            }
        }

        self.shutdown();
        debug!("Engine stopped");
    }

    // ========================================================================
    // Admission
    // ========================================================================

    fn on_request(&mut self, submission: Submission) {
        if self.link.is_none() && !self.connecting {
            let _ = submission.reply.send(Err(ZnpError::NotInitialized));
            return;
        }

        self.next_id += 1;
        let txn = Txn {
            id: TxnId(self.next_id),
            key: submission.key,
            name: submission.name,
            kind: submission.kind,
            frame: submission.frame,
            reply: submission.reply,
        };

        if self.gate.is_idle() && self.link.is_some() && !self.is_outstanding(txn.key) {
            self.gate.hold(Holder::Txn(txn.id), !self.pending.is_empty());
            self.dispatch(txn);
        } else {
            debug!(
                "Queued {} {}:{} depth={}",
                txn.id,
                txn.key.subsystem,
                txn.name,
                self.queue.len() + 1
            );
            self.queue.push_back(txn);
        }
    }

    fn on_dispatch(&mut self, epoch: u64, txn: Txn) {
        if epoch != self.epoch {
            debug!("Dispatch dropped: {} {}", txn.id, txn.key);
            self.stats.discarded += 1;
            if self.gate.is_held_by(Holder::Dispatch) {
                self.schedule_next(false);
            }
            return;
        }
        if self.link.is_none() {
            // re-init in progress: resumed by attach
            debug!("Dispatch deferred: {} {}", txn.id, txn.key);
            self.queue.push_front(txn);
            if self.gate.is_held_by(Holder::Dispatch) {
                self.gate.release();
            }
            return;
        }
        self.dispatch(txn);
    }

    /// Send a request whose gate claim has already been made
    fn dispatch(&mut self, txn: Txn) {
        match txn.kind {
            TxnKind::Sync => self.start_sync(txn),
            TxnKind::Async => {
                self.schedule_next(false);
                debug!("TX {} {}:{}", txn.id, txn.key.subsystem, txn.name);
                self.write(txn.frame);
                let _ = txn.reply.send(Ok(Value::Null));
            },
            TxnKind::Reset => self.start_reset(txn),
        }
    }

    fn start_sync(&mut self, txn: Txn) {
        let id = txn.id;
        self.gate.transfer(Holder::Txn(id));

        let start_backlog = self.backlog.snapshot();
        let timeout = self.arm(self.config.request_timeout(), Timer::HardTimeout(id));
        let promote = self.arm(self.config.promotion_interval(), Timer::Promote(id));

        debug!("TX {} {}:{} gate={}", id, txn.key.subsystem, txn.name, self.gate);
        self.write(txn.frame);
        self.stats.requests_sent += 1;

        self.pending.insert(
            id,
            InFlight {
                key: txn.key,
                name: txn.name,
                reply: txn.reply,
                start_backlog,
                timeout,
                promote: Some(promote),
            },
        );
    }

    fn start_reset(&mut self, txn: Txn) {
        self.gate.transfer(Holder::Reset);
        self.resetting = true;

        let dropped = self.queue.clear();
        self.stats.discarded += dropped as u64;
        info!("Reset {}: discarded {} queued", txn.id, dropped);

        self.reset_waiters.push(txn.reply);
        self.reset_epoch += 1;
        if let Some(failsafe) = self.reset_failsafe.take() {
            failsafe.abort();
        }
        self.reset_failsafe = Some(self.arm(
            self.config.reset_failsafe(),
            Timer::ResetFailsafe(self.reset_epoch),
        ));

        self.write(txn.frame);
    }

    /// Pick the next queued request and dispatch it on a later turn.
    ///
    /// `early` is the promotion path: with nothing eligible the gate stays
    /// with its holder. Otherwise an empty pick releases the gate.
    fn schedule_next(&mut self, early: bool) {
        if self.resetting {
            return;
        }
        if self.link.is_none() {
            // nothing is sent until a stream is attached
            if !early {
                self.gate.release();
            }
            return;
        }

        let pending = &self.pending;
        let next = self
            .queue
            .take_first(|txn| !pending.values().any(|f| f.key == txn.key));

        match next {
            Some(txn) => {
                if early {
                    self.stats.promotions += 1;
                    info!("Promote {} {}:{}", txn.id, txn.key.subsystem, txn.name);
                }
                self.gate.hold(Holder::Dispatch, !self.pending.is_empty());
                let _ = self.tx.send(EngineMsg::Dispatch {
                    epoch: self.epoch,
                    txn,
                });
            },
            None if !early => {
                if !self.queue.is_empty() {
                    trace!("Queue blocked: {} waiting on outstanding keys", self.queue.len());
                }
                self.gate.release();
            },
            None => {},
        }
    }

    fn is_outstanding(&self, key: CorrelationKey) -> bool {
        self.pending.values().any(|f| f.key == key)
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::HardTimeout(id) => {
                if let Some(flight) = self.pending.get(&id) {
                    let key = flight.key;
                    debug!("Timeout {} {}:{}", id, key.subsystem, flight.name);
                    self.stats.timeouts += 1;
                    self.settle(id, Err(ZnpError::Timeout(key)));
                }
            },
            Timer::Promote(id) => {
                let Some(flight) = self.pending.get_mut(&id) else {
                    return;
                };
                flight.promote = None;
                let key = flight.key;
                self.backlog.record(key, id);
                trace!("Backlog +{} {} size={}", id, key, self.backlog.len());

                if self.gate.is_held_by(Holder::Txn(id)) {
                    self.schedule_next(true);
                }
            },
            Timer::ResetFailsafe(epoch) => {
                if epoch != self.reset_epoch || !self.resetting {
                    return;
                }
                self.reset_failsafe = None;
                self.resetting = false;
                self.stats.reset_failsafe_fired += 1;
                warn!(
                    "Reset failsafe: no resetInd after {}ms, releasing gate ({} waiter(s) left pending)",
                    self.config.reset_failsafe_ms,
                    self.reset_waiters.len()
                );
                if self.gate.is_held_by(Holder::Reset) {
                    self.schedule_next(false);
                }
            },
        }
    }

    fn on_inbound(&mut self, event: Inbound) {
        match event {
            Inbound::SyncReply { key, value } => match self.find_pending(key) {
                Some(id) => {
                    self.stats.replies += 1;
                    self.settle(id, Ok(value));
                },
                None => {
                    self.stats.unsolicited_replies += 1;
                    debug!("RX unsolicited: {}", key);
                },
            },
            Inbound::DeviceError { key, code } => match self.find_pending(key) {
                Some(id) => {
                    self.stats.device_errors += 1;
                    self.settle(id, Err(ZnpError::Device { key, code }));
                },
                None => debug!("RX rpcError for idle key: {}", key),
            },
            Inbound::ResetComplete => self.on_reset_complete(),
        }
    }

    fn find_pending(&self, key: CorrelationKey) -> Option<TxnId> {
        self.pending
            .iter()
            .filter(|(_, f)| f.key == key)
            .map(|(id, _)| *id)
            .min()
    }

    /// Deliver the first outcome of a synchronous request; later ones are
    /// ignored because the entry is gone
    fn settle(&mut self, id: TxnId, outcome: Result<Value>) {
        let mut work = vec![(id, outcome)];
        let mut settled = Vec::new();
        let mut release = false;

        while let Some((id, outcome)) = work.pop() {
            let Some(flight) = self.pending.remove(&id) else {
                continue;
            };
            flight.cancel_timers();

            for entry in &flight.start_backlog {
                if self.backlog.remove(entry.txn) && self.pending.contains_key(&entry.txn) {
                    self.stats.swept_backlog_entries += 1;
                    warn!(
                        "Backlog sweep: {} {} still outstanding when {} settled",
                        entry.txn, entry.key, id
                    );
                    work.push((entry.txn, Err(ZnpError::Timeout(entry.key))));
                }
            }

            self.backlog.remove(id);
            release |= self.gate.is_held_by(Holder::Txn(id));
            settled.push((flight.reply, outcome));
        }

        if release || (self.gate.is_idle() && !self.queue.is_empty()) {
            self.schedule_next(false);
        }

        for (reply, outcome) in settled {
            let _ = reply.send(outcome);
        }
    }

    fn on_reset_complete(&mut self) {
        if let Some(failsafe) = self.reset_failsafe.take() {
            failsafe.abort();
        }
        if std::mem::replace(&mut self.resetting, false) {
            info!("Reset complete");
        }
        if self.gate.is_held_by(Holder::Reset) {
            self.schedule_next(false);
        }
        for waiter in self.reset_waiters.drain(..) {
            let _ = waiter.send(Ok(Value::Null));
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn on_attach(&mut self, transport: Box<dyn Transport>, reply: oneshot::Sender<Result<()>>) {
        if self.closing.is_some() {
            let _ = reply.send(Err(ZnpError::transport("close in progress")));
            return;
        }
        if self.connecting {
            let _ = reply.send(Err(ZnpError::transport("init already in progress")));
            return;
        }

        // re-init: drop the previous stream without a Close event
        let previous = self.link.take().map(|link| {
            link.reader_task.abort();
            link.writer_task
        });
        let replaced = previous.is_some();

        self.connecting = true;
        self.state.send_replace(ConnectionState::Connecting);
        info!("Init: {}", transport.describe());

        let tx = self.tx.clone();
        tokio::spawn(async move {
            // the port must be released before it is opened again
            if let Some(writer_task) = previous {
                let _ = writer_task.await;
            }
            let result = transport.open().await;
            let _ = tx.send(EngineMsg::Opened {
                result,
                replaced,
                reply,
            });
        });
    }

    fn on_opened(
        &mut self,
        result: Result<DeviceStream>,
        replaced: bool,
        reply: oneshot::Sender<Result<()>>,
    ) {
        self.connecting = false;

        if let Some(waiters) = self.closing.take() {
            // close() arrived while opening
            drop(result);
            self.reset_transmit_state();
            self.state.send_replace(ConnectionState::Uninitialized);
            if replaced {
                let _ = self.events.send(ZnpEvent::Close);
            }
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
            let _ = reply.send(Err(ZnpError::transport("closed during init")));
            return;
        }

        match result {
            Ok(stream) => {
                self.attach(stream);
                let _ = reply.send(Ok(()));
            },
            Err(e) => {
                error!("Init: {}", e);
                self.state.send_replace(ConnectionState::Uninitialized);
                self.reset_transmit_state();
                if replaced {
                    let _ = self.events.send(ZnpEvent::Close);
                }
                let _ = reply.send(Err(e));
            },
        }
    }

    fn attach(&mut self, stream: DeviceStream) {
        self.session += 1;
        let session = self.session;

        let (read_half, write_half) = tokio::io::split(stream);
        let dispatcher = Dispatcher::new(
            self.schema.clone(),
            self.events.clone(),
            self.tx.clone(),
            session,
        );
        let reader_task = tokio::spawn(dispatcher.run(FramedRead::new(read_half, MtCodec::new())));

        let (writer, frames) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(
            FramedWrite::new(write_half, MtCodec::new()),
            frames,
            self.tx.clone(),
            session,
        ));

        self.link = Some(Link {
            session,
            writer,
            reader_task,
            writer_task,
        });
        self.state.send_replace(ConnectionState::Connected);
        info!("Link ready: session {}", session);
        let _ = self.events.send(ZnpEvent::Ready);

        if self.gate.is_idle() && !self.queue.is_empty() {
            debug!("Resume: {} queued", self.queue.len());
            self.schedule_next(false);
        }
    }

    fn on_close(&mut self, reply: oneshot::Sender<Result<()>>) {
        if let Some(waiters) = self.closing.as_mut() {
            waiters.push(reply);
            return;
        }
        if self.connecting {
            self.closing = Some(vec![reply]);
            return;
        }
        if self.link.is_none() {
            let _ = reply.send(Ok(()));
            return;
        }

        self.closing = Some(vec![reply]);
        self.begin_close();
    }

    /// Detach the stream; `Closed` follows once the writer has flushed
    fn begin_close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        self.closing.get_or_insert_with(Vec::new);
        self.state.send_replace(ConnectionState::Closing);

        link.reader_task.abort();
        drop(link.writer);
        self.reset_transmit_state();

        let tx = self.tx.clone();
        let writer_task = link.writer_task;
        tokio::spawn(async move {
            let result = match writer_task.await {
                Ok(result) => result,
                Err(e) => Err(ZnpError::transport(e.to_string())),
            };
            let _ = tx.send(EngineMsg::Closed { result });
        });
    }

    fn on_closed(&mut self, result: Result<()>) {
        if let Err(e) = &result {
            warn!("Close: {}", e);
        }
        self.state.send_replace(ConnectionState::Uninitialized);
        info!("Link closed");
        let _ = self.events.send(ZnpEvent::Close);

        for waiter in self.closing.take().unwrap_or_default() {
            let _ = waiter.send(result.clone());
        }
    }

    /// Queue and reset state do not survive a close. Outstanding requests
    /// keep their timers and settle by timeout.
    fn reset_transmit_state(&mut self) {
        self.epoch += 1;
        let dropped = self.queue.clear();
        self.stats.discarded += dropped as u64;
        if dropped > 0 {
            debug!("Close: discarded {} queued", dropped);
        }

        if let Some(failsafe) = self.reset_failsafe.take() {
            failsafe.abort();
        }
        self.resetting = false;
        self.reset_waiters.clear();
        if self.gate.is_held_by(Holder::Reset) {
            self.gate.release();
        }
    }

    fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            link.reader_task.abort();
        }
        for flight in self.pending.values() {
            flight.cancel_timers();
        }
        if let Some(failsafe) = self.reset_failsafe.take() {
            failsafe.abort();
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn write(&self, frame: MtFrame) {
        match &self.link {
            Some(link) => {
                if link.writer.send(frame).is_err() {
                    debug!("TX dropped: writer gone");
                }
            },
            None => debug!("TX dropped: not attached"),
        }
    }

    fn arm(&self, after: Duration, timer: Timer) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(EngineMsg::Timer(timer));
        })
    }

    fn snapshot(&self) -> EngineSnapshot {
        let mut outstanding: Vec<_> = self.pending.iter().map(|(id, f)| (*id, f.key)).collect();
        outstanding.sort_by_key(|(id, _)| *id);

        EngineSnapshot {
            gate: self.gate,
            queue_len: self.queue.len(),
            backlog: self.backlog.keys(),
            outstanding: outstanding.into_iter().map(|(_, key)| key).collect(),
            resetting: self.resetting,
            reset_waiters: self.reset_waiters.len(),
            stats: self.stats.clone(),
        }
    }
}

/// Owns the write half; flushes and shuts it down once the engine drops the
/// frame sender
async fn write_loop<W>(
    mut sink: FramedWrite<W, MtCodec>,
    mut frames: mpsc::UnboundedReceiver<MtFrame>,
    engine: mpsc::UnboundedSender<EngineMsg>,
    session: u64,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        trace!("TX: {}", frame);
        if let Err(e) = sink.send(frame).await {
            error!("TX: {}", e);
            let _ = engine.send(EngineMsg::TransportLost {
                session,
                reason: e.to_string(),
            });
            return Err(e.into());
        }
    }

    sink.close().await?;
    debug!("TX closed");
    Ok(())
}
