//! The scheduling loop
//!
//! All scheduling decisions - capacity checks, identity-to-session
//! assignment, dispatch ordering - happen inside one task. Deliveries run
//! concurrently in session workers, but the queue and session table are
//! only ever touched here, so the concurrency bound can never race.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;

use super::commands::{DispatcherCommand, SessionCommand, SessionEvent};
use super::session::{Session, SessionTable};
use super::worker::{spawn_session_worker, WorkerContext};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::host::HostFactory;
use crate::journal::{LogEntry, MessageLog};
use crate::queue::TaskQueue;
use crate::types::{AgentIdentity, DeliveryOutcome, LifecycleEvent, MessageRecord, SessionState, Task};

pub(super) struct Scheduler {
    config: RelayConfig,
    journal: Arc<MessageLog>,
    factory: Arc<dyn HostFactory>,
    queue: TaskQueue,
    sessions: SessionTable,
    command_rx: mpsc::UnboundedReceiver<DispatcherCommand>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    stop_waiters: Vec<tokio::sync::oneshot::Sender<()>>,
    stopping: bool,
    deadline_armed: bool,
    commands_closed: bool,
    fatal: Option<String>,
}

impl Scheduler {
    pub fn new(
        config: RelayConfig,
        journal: Arc<MessageLog>,
        factory: Arc<dyn HostFactory>,
        command_rx: mpsc::UnboundedReceiver<DispatcherCommand>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            config,
            journal,
            factory,
            queue: TaskQueue::new(),
            sessions: SessionTable::new(),
            command_rx,
            events_tx,
            events_rx,
            stop_waiters: Vec::new(),
            stopping: false,
            deadline_armed: false,
            commands_closed: false,
            fatal: None,
        }
    }

    pub async fn run(mut self) {
        let reap_period = self
            .config
            .idle_timeout
            .checked_div(4)
            .unwrap_or(Duration::from_millis(250))
            .max(Duration::from_millis(10));
        let mut reap = tokio::time::interval(reap_period);
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_cmd = self.command_rx.recv(), if !self.commands_closed => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            // Handle dropped: drain sessions and exit
                            self.commands_closed = true;
                            self.begin_stop_all(None);
                        }
                    }
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = reap.tick() => self.reap_idle(),
            }

            if self.fatal.is_some() {
                break;
            }
            if self.commands_closed && self.sessions.is_empty() {
                break;
            }
        }

        log::debug!("Scheduler loop exited");
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_command(&mut self, cmd: DispatcherCommand) {
        match cmd {
            DispatcherCommand::Submit {
                source,
                target,
                payload,
                response_tx,
            } => {
                if let Some(msg) = &self.fatal {
                    let _ = response_tx.send(Err(RelayError::persistence(msg.clone())));
                    return;
                }
                if self.queue.is_closed() {
                    let _ = response_tx.send(Err(RelayError::QueueClosed));
                    return;
                }

                let task = Task::new(source, target, payload);
                let queued = LogEntry::lifecycle(
                    LifecycleEvent::TaskQueued,
                    task.target.clone(),
                    Some(task.id.clone()),
                    "queued",
                );
                if self.append(queued).is_none() {
                    let _ = response_tx.send(Err(RelayError::persistence(
                        "journal append failed; dispatcher halted",
                    )));
                    return;
                }

                let task_id = task.id.clone();
                match self.queue.enqueue(task) {
                    Ok(()) => {
                        let _ = response_tx.send(Ok(task_id));
                        self.schedule();
                    }
                    Err(e) => {
                        let _ = response_tx.send(Err(e));
                    }
                }
            }

            DispatcherCommand::Prestart {
                identities,
                response_tx,
            } => {
                for identity in identities {
                    if self.stopping || self.fatal.is_some() {
                        break;
                    }
                    if self.sessions.get(&identity).is_some() {
                        continue;
                    }
                    if self.sessions.live_count() >= self.config.max_concurrent_sessions {
                        log::warn!("Prestart of '{identity}' skipped: session bound reached");
                        continue;
                    }
                    let starting = LogEntry::lifecycle(
                        LifecycleEvent::SessionStarting,
                        identity.clone(),
                        None,
                        "starting host",
                    );
                    if self.append(starting).is_none() {
                        break;
                    }
                    self.start_session(identity, None);
                }
                let _ = response_tx.send(());
            }

            DispatcherCommand::StopAll { response_tx } => {
                self.begin_stop_all(Some(response_tx));
            }
        }
    }

    // ------------------------------------------------------------------
    // Session events
    // ------------------------------------------------------------------

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ShutdownDeadline => self.force_stop(),
            other => self.apply_event(other),
        }
    }

    fn apply_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Ready { identity } => {
                let mut became_ready = false;
                if let Some(session) = self.sessions.get_mut(&identity) {
                    session.last_activity = Instant::now();
                    if session.state == SessionState::Starting {
                        session.state = if session.current_task.is_some() {
                            SessionState::Busy
                        } else {
                            SessionState::Ready
                        };
                        became_ready = true;
                    }
                }
                if became_ready {
                    let ready = LogEntry::lifecycle(
                        LifecycleEvent::SessionReady,
                        identity.clone(),
                        None,
                        "host ready",
                    );
                    self.append(ready);
                }
                self.schedule();
            }

            SessionEvent::Delivered {
                identity,
                task_id,
                outcome,
            } => {
                log::debug!("[{identity}] task {task_id} delivered ({outcome:?})");
                let stopping = self.stopping;
                let mut began_stopping = false;
                if let Some(session) = self.sessions.get_mut(&identity) {
                    session.current_task = None;
                    session.last_activity = Instant::now();
                    session.state = if stopping {
                        began_stopping = true;
                        SessionState::Stopping
                    } else {
                        SessionState::Ready
                    };
                }
                if began_stopping {
                    self.append_stopping(&identity, "shutdown requested");
                }
                self.schedule();
            }

            SessionEvent::DeliveryFailed {
                identity,
                task_id,
                error,
            } => {
                log::warn!("[{identity}] task {task_id} failed: {error}");
                let mut began_stopping = false;
                if let Some(session) = self.sessions.get_mut(&identity) {
                    session.current_task = None;
                    // The worker is stopping its host; Stopped follows
                    session.state = SessionState::Stopping;
                    began_stopping = true;
                }
                if began_stopping {
                    self.append_stopping(&identity, "delivery failed");
                }
            }

            SessionEvent::StartFailed {
                identity,
                task,
                error,
            } => {
                match &task {
                    Some(task) => {
                        log::warn!("[{identity}] start failed, task {} marked failed: {error}", task.id);
                    }
                    None => log::warn!("[{identity}] start failed: {error}"),
                }
                if let Some(session) = self.sessions.remove(&identity) {
                    session.worker.abort();
                }
                let terminated = LogEntry::lifecycle(
                    LifecycleEvent::SessionTerminated,
                    identity,
                    task.map(|t| t.id),
                    error.to_string(),
                );
                self.append(terminated);
                self.maybe_finish_stop();
                self.schedule();
            }

            SessionEvent::Stopped { identity } => {
                if self.sessions.remove(&identity).is_some() {
                    let stopped = LogEntry::lifecycle(
                        LifecycleEvent::SessionStopped,
                        identity.clone(),
                        None,
                        "stopped",
                    );
                    self.append(stopped);
                    log::debug!("[{identity}] session stopped");
                }
                self.maybe_finish_stop();
                self.schedule();
            }

            SessionEvent::Fatal { error } => self.fail(error),

            // Routed through handle_event; nothing to apply here
            SessionEvent::ShutdownDeadline => {}
        }
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Dispatch admissible tasks until capacity or the queue runs out
    fn schedule(&mut self) {
        if self.stopping || self.fatal.is_some() {
            return;
        }

        loop {
            let has_capacity = self.sessions.live_count() < self.config.max_concurrent_sessions;
            let sessions = &self.sessions;
            let next = self.queue.dequeue_next(|identity| {
                match sessions.get(identity) {
                    // A live session is only admissible when idle
                    Some(session) => session.state == SessionState::Ready,
                    // A fresh session may be created while under the bound
                    None => has_capacity,
                }
            });

            let Some(task) = next else { break };
            self.dispatch(task);
            if self.fatal.is_some() {
                break;
            }
        }
    }

    fn dispatch(&mut self, task: Task) {
        let dispatched = LogEntry::lifecycle(
            LifecycleEvent::TaskDispatched,
            task.target.clone(),
            Some(task.id.clone()),
            "dispatched",
        );
        if self.append(dispatched).is_none() {
            return;
        }

        if self.sessions.get(&task.target).is_none() {
            let starting = LogEntry::lifecycle(
                LifecycleEvent::SessionStarting,
                task.target.clone(),
                Some(task.id.clone()),
                "starting host",
            );
            if self.append(starting).is_none() {
                return;
            }
            self.start_session(task.target.clone(), Some(task));
            return;
        }

        let target = task.target.clone();
        let mut worker_gone = false;
        if let Some(session) = self.sessions.get_mut(&target) {
            session.state = SessionState::Busy;
            session.current_task = Some(task.clone());
            session.last_activity = Instant::now();
            worker_gone = session
                .command_tx
                .send(SessionCommand::Deliver { task })
                .is_err();
        }

        if worker_gone {
            // Worker died underneath us; fail the task and drop the session
            log::warn!("[{target}] worker gone at dispatch; failing task");
            if let Some(session) = self.sessions.remove(&target) {
                session.worker.abort();
                if let Some(task) = session.current_task {
                    self.append(LogEntry::delivery(
                        task.source,
                        task.target,
                        task.id,
                        task.payload,
                        DeliveryOutcome::Failed,
                    ));
                }
            }
            self.append(LogEntry::lifecycle(
                LifecycleEvent::SessionTerminated,
                target,
                None,
                "worker exited unexpectedly",
            ));
        }
    }

    fn start_session(&mut self, identity: AgentIdentity, first_task: Option<Task>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            identity: identity.clone(),
            journal: Arc::clone(&self.journal),
            readiness_timeout: self.config.readiness_timeout,
            events_tx: self.events_tx.clone(),
        };
        let worker = spawn_session_worker(ctx, Arc::clone(&self.factory), first_task.clone(), command_rx);

        log::debug!("[{identity}] session starting");
        self.sessions.insert(
            identity,
            Session {
                state: SessionState::Starting,
                created_at: Utc::now(),
                last_activity: Instant::now(),
                current_task: first_task,
                command_tx,
                worker,
            },
        );
    }

    /// Stop Ready sessions idle beyond the configured timeout
    ///
    /// A session is not a permanent reservation: freeing idle capacity is
    /// what lets bursty workloads to other identities get through.
    fn reap_idle(&mut self) {
        if self.stopping || self.fatal.is_some() {
            return;
        }
        for identity in self.sessions.idle_ready(self.config.idle_timeout) {
            if let Some(session) = self.sessions.get_mut(&identity) {
                log::debug!("[{identity}] idle; stopping session to free capacity");
                session.state = SessionState::Stopping;
                let _ = session.command_tx.send(SessionCommand::Shutdown);
            }
            self.append_stopping(&identity, "idle timeout");
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    fn begin_stop_all(&mut self, responder: Option<tokio::sync::oneshot::Sender<()>>) {
        self.queue.close();

        if !self.stopping {
            self.stopping = true;
            let mut now_stopping = Vec::new();
            for (identity, session) in self.sessions.iter_mut() {
                if session.state == SessionState::Stopping {
                    continue;
                }
                log::debug!("[{identity}] shutdown requested");
                let _ = session.command_tx.send(SessionCommand::Shutdown);
                // Workers with a delivery in flight drain it first and
                // transition once their Delivered event lands
                if session.current_task.is_none() {
                    session.state = SessionState::Stopping;
                    now_stopping.push(identity.clone());
                }
            }
            for identity in now_stopping {
                self.append_stopping(&identity, "shutdown requested");
            }
        }

        if !self.deadline_armed && !self.sessions.is_empty() {
            self.deadline_armed = true;
            let events_tx = self.events_tx.clone();
            let deadline = self.config.shutdown_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                let _ = events_tx.send(SessionEvent::ShutdownDeadline);
            });
        }

        if let Some(tx) = responder {
            if self.sessions.is_empty() {
                let _ = tx.send(());
            } else {
                self.stop_waiters.push(tx);
            }
        }
    }

    /// Forcibly terminate sessions that outlived the shutdown timeout
    fn force_stop(&mut self) {
        if !self.stopping || self.sessions.is_empty() {
            self.maybe_finish_stop();
            return;
        }

        // Abort the workers first so no further deliveries can begin, then
        // apply every outcome that landed before the deadline fired; only
        // tasks still without a terminal record get one forced here
        for (_, session) in self.sessions.iter_mut() {
            session.worker.abort();
        }
        while let Ok(event) = self.events_rx.try_recv() {
            if !matches!(event, SessionEvent::ShutdownDeadline) {
                self.apply_event(event);
            }
        }

        let remaining: Vec<(AgentIdentity, Session)> = self.sessions.drain().collect();
        for (identity, session) in remaining {
            log::warn!("[{identity}] forcibly terminated at shutdown timeout");
            if let Some(task) = session.current_task {
                // The in-flight task never got its terminal record
                self.append(LogEntry::delivery(
                    task.source,
                    task.target,
                    task.id,
                    task.payload,
                    DeliveryOutcome::Failed,
                ));
            }
            self.append(LogEntry::lifecycle(
                LifecycleEvent::SessionTerminated,
                identity,
                None,
                "forced termination at shutdown timeout",
            ));
        }
        self.maybe_finish_stop();
    }

    fn maybe_finish_stop(&mut self) {
        if self.stopping && self.sessions.is_empty() {
            for tx in self.stop_waiters.drain(..) {
                let _ = tx.send(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Journal + fatal handling
    // ------------------------------------------------------------------

    /// Record the start of a graceful session stop
    ///
    /// The snapshot fold derives live-session counts from the journal, so
    /// the slot release must be visible there before any later start.
    fn append_stopping(&mut self, identity: &AgentIdentity, reason: &str) {
        self.append(LogEntry::lifecycle(
            LifecycleEvent::SessionStopping,
            identity.clone(),
            None,
            reason,
        ));
    }

    /// Append to the journal, halting the system on persistence failure
    fn append(&mut self, entry: LogEntry) -> Option<MessageRecord> {
        match self.journal.append(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    /// Halt cleanly: the journal is the source of truth, so the system
    /// must not keep operating with unrecorded state
    fn fail(&mut self, error: RelayError) {
        if self.fatal.is_some() {
            return;
        }
        log::error!("Fatal dispatcher error: {error}");
        self.queue.close();
        let sessions: Vec<(AgentIdentity, Session)> = self.sessions.drain().collect();
        for (_, session) in sessions {
            session.worker.abort();
        }
        self.fatal = Some(error.to_string());
        for tx in self.stop_waiters.drain(..) {
            let _ = tx.send(());
        }
    }
}
