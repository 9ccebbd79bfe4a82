//! Reconnectable terminal sessions keyed by a client-chosen id.
//!
//! A session owns one [`PtyHost`] and a non-owning binding to whichever
//! connection attached it last. Output is pumped to that connection's event
//! sink, or into a bounded backlog while nothing is bound or the sink is full.
//!
//! Each session id has its own async mutex (the "slot"). Lock order is
//! always slot, then delivery. The delivery lock is never held across an
//! await.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backlog::OutputBacklog;
use crate::decoder::Utf8Decoder;
use crate::error::{Result, TerminalError};
use crate::pty::{lock_recovering, PtyHost, SpawnOptions};

/// How often buffered output is offered again to a sink that was full.
const FLUSH_RETRY: Duration = Duration::from_millis(25);

/// Identity of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    Ready,
    Output(String),
    Exited,
}

/// What a bound connection receives from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: String,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    fn new(session_id: &str, kind: SessionEventKind) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Spawned,
    Rebound,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
    /// Output kept while no connection is bound.
    pub backlog_bytes: usize,
    /// How long an orphaned session waits for a reattach. Zero terminates at once.
    pub reconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            args: Vec::new(),
            cwd: None,
            env: vec![
                ("TERM".to_string(), "xterm-256color".to_string()),
                ("COLORTERM".to_string(), "truecolor".to_string()),
            ],
            cols: 80,
            rows: 24,
            backlog_bytes: 64 * 1024,
            reconnect_grace: Duration::ZERO,
        }
    }
}

impl SessionConfig {
    fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            shell: self.shell.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            cols: self.cols,
            rows: self.rows,
        }
    }
}

struct Delivery {
    owner: Option<ConnectionId>,
    sink: Option<flume::Sender<SessionEvent>>,
    backlog: OutputBacklog,
    orphan_epoch: u64,
}

impl Delivery {
    /// Hand `text` to the sink without waiting. Returns it if the sink is
    /// full, and unbinds a sink whose connection has gone away.
    fn offer(&mut self, session_id: &str, text: String) -> Option<String> {
        let Some(sink) = &self.sink else {
            return Some(text);
        };
        let event = SessionEvent::new(session_id, SessionEventKind::Output(text));
        let rejected = match sink.try_send(event) {
            Ok(()) => return None,
            Err(flume::TrySendError::Full(event)) => event,
            Err(flume::TrySendError::Disconnected(event)) => {
                debug!(session = %session_id, "event sink closed, buffering output");
                self.sink = None;
                event
            }
        };
        match rejected.kind {
            SessionEventKind::Output(text) => Some(text),
            _ => None,
        }
    }

    fn push_output(&mut self, session_id: &str, text: String) {
        // Anything already buffered goes first.
        let text = if self.backlog.is_empty() {
            match self.offer(session_id, text) {
                Some(text) => text,
                None => return,
            }
        } else {
            text
        };
        self.backlog.push(text);
    }

    /// Offer buffered output to the bound sink until it fills up.
    fn flush(&mut self, session_id: &str) {
        if self.sink.is_none() {
            return;
        }
        let dropped = self.backlog.take_dropped();
        if dropped > 0 {
            warn!(session = %session_id, dropped, "terminal output evicted before delivery");
        }
        while let Some(chunk) = self.backlog.pop_front() {
            if let Some(chunk) = self.offer(session_id, chunk) {
                self.backlog.requeue(chunk);
                return;
            }
        }
    }

    fn has_pending(&self) -> bool {
        self.sink.is_some() && !self.backlog.is_empty()
    }
}

struct TerminalSession {
    id: String,
    host: PtyHost,
    delivery: std::sync::Mutex<Delivery>,
    closing: AtomicBool,
}

impl TerminalSession {
    fn delivery(&self) -> MutexGuard<'_, Delivery> {
        lock_recovering(&self.delivery)
    }

    /// Point delivery at a new connection, announce readiness, then replay
    /// anything buffered.
    async fn bind(&self, connection: ConnectionId, sink: flume::Sender<SessionEvent>) {
        // Sent before the sink is installed so no output can overtake it.
        let open = sink
            .send_async(SessionEvent::new(&self.id, SessionEventKind::Ready))
            .await
            .is_ok();

        let mut delivery = self.delivery();
        delivery.owner = Some(connection);
        delivery.sink = open.then_some(sink);
        delivery.flush(&self.id);
    }

    /// Deliver whatever is still buffered, then the exit notice. Waits on the
    /// sink; only the pump calls this, after the process is gone.
    async fn notify_exit(&self) {
        let (sink, chunks) = {
            let mut delivery = self.delivery();
            let Some(sink) = delivery.sink.clone() else {
                return;
            };
            (sink, delivery.backlog.drain().0)
        };
        for chunk in chunks {
            let event = SessionEvent::new(&self.id, SessionEventKind::Output(chunk));
            if sink.send_async(event).await.is_err() {
                return;
            }
        }
        let _ = sink
            .send_async(SessionEvent::new(&self.id, SessionEventKind::Exited))
            .await;
    }
}

type Slot = Arc<Mutex<Option<Arc<TerminalSession>>>>;

struct Inner {
    config: SessionConfig,
    sessions: DashMap<String, Slot>,
}

/// Owns every terminal session in the process.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    fn slot(&self, session_id: &str) -> Option<Slot> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn is_current(&self, session_id: &str, slot: &Slot) -> bool {
        self.inner
            .sessions
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot))
    }

    fn forget(&self, session_id: &str, slot: &Slot) {
        self.inner
            .sessions
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Bind `connection` to the session, spawning its process if none is live.
    pub async fn attach(
        &self,
        session_id: &str,
        connection: ConnectionId,
        sink: flume::Sender<SessionEvent>,
    ) -> Result<AttachOutcome> {
        loop {
            let slot = Arc::clone(
                self.inner
                    .sessions
                    .entry(session_id.to_string())
                    .or_default()
                    .value(),
            );
            let mut guard = slot.lock().await;
            if !self.is_current(session_id, &slot) {
                // Detached while we waited; the slot is dead.
                continue;
            }

            if let Some(session) = guard.as_ref() {
                if session.host.is_alive() {
                    session.bind(connection, sink).await;
                    info!(session = %session_id, %connection, "terminal session rebound");
                    return Ok(AttachOutcome::Rebound);
                }
                // Exited but not yet reaped by its pump; replace it.
                session.closing.store(true, Ordering::SeqCst);
                tokio::spawn(Self::terminate(Arc::clone(session)));
            }

            let options = self.inner.config.spawn_options();
            let spawned = tokio::task::spawn_blocking(move || PtyHost::spawn(&options))
                .await
                .map_err(|e| TerminalError::Internal(format!("spawn task failed: {e}")))
                .and_then(|result| result);
            let host = match spawned {
                Ok(host) => host,
                Err(e) => {
                    *guard = None;
                    self.forget(session_id, &slot);
                    warn!(session = %session_id, error = %e, "failed to spawn terminal");
                    return Err(e);
                }
            };

            let session = Arc::new(TerminalSession {
                id: session_id.to_string(),
                host,
                delivery: std::sync::Mutex::new(Delivery {
                    owner: None,
                    sink: None,
                    backlog: OutputBacklog::new(self.inner.config.backlog_bytes),
                    orphan_epoch: 0,
                }),
                closing: AtomicBool::new(false),
            });
            session.bind(connection, sink).await;
            self.start_pump(Arc::clone(&session), Arc::clone(&slot));
            info!(
                session = %session_id,
                %connection,
                pid = session.host.pid(),
                "terminal session spawned"
            );
            *guard = Some(session);
            return Ok(AttachOutcome::Spawned);
        }
    }

    fn start_pump(&self, session: Arc<TerminalSession>, slot: Slot) {
        let manager = self.clone();
        let output = session.host.output();
        tokio::spawn(async move {
            let mut decoder = Utf8Decoder::new();
            loop {
                let pending = session.delivery().has_pending();
                tokio::select! {
                    received = output.recv_async() => {
                        let Ok(bytes) = received else { break };
                        let text = decoder.decode(&bytes);
                        if !text.is_empty() {
                            session.delivery().push_output(&session.id, text);
                        }
                    }
                    _ = tokio::time::sleep(FLUSH_RETRY), if pending => {
                        session.delivery().flush(&session.id);
                    }
                }
            }
            let tail = decoder.finish();
            if !tail.is_empty() {
                session.delivery().push_output(&session.id, tail);
            }
            manager.reap(session, slot).await;
        });
    }

    /// Called once the process closed its terminal.
    async fn reap(&self, session: Arc<TerminalSession>, slot: Slot) {
        let mut guard = slot.lock().await;
        if session.closing.swap(true, Ordering::SeqCst) {
            // Detached or replaced; whoever did that owns the cleanup.
            return;
        }
        if guard.as_ref().is_some_and(|s| Arc::ptr_eq(s, &session)) {
            *guard = None;
            self.forget(&session.id, &slot);
        }
        drop(guard);

        if let Err(e) = session.host.kill().await {
            warn!(session = %session.id, error = %e, "failed to reap terminal process");
        }
        info!(session = %session.id, "terminal process exited");
        session.notify_exit().await;
    }

    pub async fn write(&self, session_id: &str, data: Vec<u8>) -> Result<()> {
        let Some(slot) = self.slot(session_id) else {
            warn!(session = %session_id, "input for unknown terminal session");
            return Ok(());
        };
        let guard = slot.lock().await;
        match guard.as_ref() {
            Some(session) => session.host.write(data).await,
            None => {
                warn!(session = %session_id, "input for unknown terminal session");
                Ok(())
            }
        }
    }

    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        let Some(slot) = self.slot(session_id) else {
            debug!(session = %session_id, "resize for unknown terminal session");
            return Ok(());
        };
        let guard = slot.lock().await;
        match guard.as_ref() {
            Some(session) => session.host.resize(cols, rows),
            None => Ok(()),
        }
    }

    /// Take the session out of its slot if `predicate` holds. The caller
    /// terminates the returned session.
    async fn close_where<F>(
        &self,
        session_id: &str,
        slot: &Slot,
        predicate: F,
    ) -> Option<Arc<TerminalSession>>
    where
        F: FnOnce(&Arc<TerminalSession>, &Delivery) -> bool,
    {
        let mut guard = slot.lock().await;
        let session = Arc::clone(guard.as_ref()?);
        if !predicate(&session, &session.delivery()) {
            return None;
        }
        session.closing.store(true, Ordering::SeqCst);
        *guard = None;
        self.forget(session_id, slot);
        Some(session)
    }

    async fn terminate(session: Arc<TerminalSession>) {
        if let Err(e) = session.host.kill().await {
            warn!(session = %session.id, error = %e, "failed to terminate terminal process");
        }
        info!(session = %session.id, pid = session.host.pid(), "terminal session closed");
    }

    /// Terminate the session's process and forget it. Unknown ids are a no-op.
    pub async fn detach(&self, session_id: &str) {
        let Some(slot) = self.slot(session_id) else {
            return;
        };
        if let Some(session) = self.close_where(session_id, &slot, |_, _| true).await {
            Self::terminate(session).await;
        }
    }

    /// Release every session currently owned by `connection`.
    ///
    /// Sessions since rebound to another connection are left alone. With a
    /// reconnect grace period, owned sessions are orphaned instead and only
    /// terminated if nobody reattaches in time.
    pub async fn detach_all(&self, connection: ConnectionId) {
        let slots: Vec<(String, Slot)> = self
            .inner
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        let grace = self.inner.config.reconnect_grace;

        for (session_id, slot) in slots {
            if grace.is_zero() {
                let owned = self
                    .close_where(&session_id, &slot, |_, delivery| {
                        delivery.owner == Some(connection)
                    })
                    .await;
                if let Some(session) = owned {
                    Self::terminate(session).await;
                }
            } else if let Some((session, epoch)) = self.orphan(&slot, connection).await {
                debug!(session = %session_id, ?grace, "terminal session orphaned");
                self.expire_later(session_id, slot, session, epoch, grace);
            }
        }
    }

    async fn orphan(
        &self,
        slot: &Slot,
        connection: ConnectionId,
    ) -> Option<(Arc<TerminalSession>, u64)> {
        let guard = slot.lock().await;
        let session = Arc::clone(guard.as_ref()?);
        let epoch = {
            let mut delivery = session.delivery();
            if delivery.owner != Some(connection) {
                return None;
            }
            delivery.owner = None;
            delivery.sink = None;
            delivery.orphan_epoch += 1;
            delivery.orphan_epoch
        };
        Some((session, epoch))
    }

    fn expire_later(
        &self,
        session_id: String,
        slot: Slot,
        orphaned: Arc<TerminalSession>,
        epoch: u64,
        grace: Duration,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let expired = manager
                .close_where(&session_id, &slot, |session, delivery| {
                    Arc::ptr_eq(session, &orphaned)
                        && delivery.owner.is_none()
                        && delivery.orphan_epoch == epoch
                })
                .await;
            if let Some(session) = expired {
                info!(session = %session_id, "reconnect grace elapsed");
                Self::terminate(session).await;
            }
        });
    }

    /// Pid of the live process behind `session_id`, if any.
    pub async fn process_id(&self, session_id: &str) -> Option<u32> {
        let slot = self.slot(session_id)?;
        let guard = slot.lock().await;
        guard.as_ref().map(|session| session.host.pid())
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Terminate every session.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, Slot)> = self
            .inner
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        for (session_id, slot) in slots {
            if let Some(session) = self.close_where(&session_id, &slot, |_, _| true).await {
                Self::terminate(session).await;
            }
        }
    }
}
