//! Public dispatcher handle
//!
//! `Dispatcher` is the control surface the hosting layer sees: submit a
//! task, query status, stop everything. All real work happens in the
//! scheduling loop; the handle just exchanges messages with it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::commands::DispatcherCommand;
use super::scheduler::Scheduler;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::host::{HostFactory, SubprocessHostFactory};
use crate::journal::MessageLog;
use crate::status::{StatusReporter, SystemSnapshot};
use crate::types::{AgentIdentity, TaskId};

/// Central scheduler handle for submitting tasks and managing sessions
///
/// Dropping the handle closes the command channel; the scheduling loop
/// then drains its sessions and exits on its own.
pub struct Dispatcher {
    command_tx: mpsc::UnboundedSender<DispatcherCommand>,
    journal: Arc<MessageLog>,
    reporter: StatusReporter,
    _scheduler: JoinHandle<()>,
}

impl Dispatcher {
    /// Create a dispatcher hosting agents as subprocesses per the config
    ///
    /// Must be called within a tokio runtime; the scheduling loop is
    /// spawned immediately.
    ///
    /// # Errors
    /// Returns `InvalidConfig` or `Persistence` if the configuration is
    /// rejected or the journal cannot be opened.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let factory = Arc::new(SubprocessHostFactory::from_config(&config));
        Self::with_factory(config, factory)
    }

    /// Create a dispatcher with a custom host factory
    ///
    /// # Errors
    /// Returns `InvalidConfig` or `Persistence` if the configuration is
    /// rejected or the journal cannot be opened.
    pub fn with_factory(config: RelayConfig, factory: Arc<dyn HostFactory>) -> Result<Self> {
        config.validate()?;

        let journal = Arc::new(MessageLog::open(&config.journal_path)?);
        let reporter = StatusReporter::new(Arc::clone(&journal), config.max_concurrent_sessions);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            config,
            Arc::clone(&journal),
            factory,
            command_rx,
            events_tx,
            events_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        Ok(Self {
            command_tx,
            journal,
            reporter,
            _scheduler: handle,
        })
    }

    /// Submit a task on behalf of the external caller
    ///
    /// Non-blocking: returns once the task is queued and its queued event
    /// is in the journal, not when it is delivered. Delivery failures are
    /// data, not control flow - observe them via [`Dispatcher::status`].
    ///
    /// # Errors
    /// Returns `QueueClosed` after `stop_all`, or `Persistence` if the
    /// system has halted.
    pub async fn submit(
        &self,
        target: impl Into<AgentIdentity>,
        payload: impl Into<String>,
    ) -> Result<TaskId> {
        self.submit_from(AgentIdentity::system(), target, payload)
            .await
    }

    /// Submit a task attributed to a specific source identity
    ///
    /// Lets one agent's host submit follow-up work in its own name; the
    /// delivery record then carries that source.
    ///
    /// # Errors
    /// Same surface as [`Dispatcher::submit`].
    pub async fn submit_from(
        &self,
        source: impl Into<AgentIdentity>,
        target: impl Into<AgentIdentity>,
        payload: impl Into<String>,
    ) -> Result<TaskId> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(DispatcherCommand::Submit {
                source: source.into(),
                target: target.into(),
                payload: payload.into(),
                response_tx,
            })
            .map_err(|_| RelayError::persistence("dispatcher halted"))?;

        response_rx
            .await
            .map_err(|_| RelayError::persistence("dispatcher halted"))?
    }

    /// Eagerly start sessions for a fixed role set
    ///
    /// Identities that already have a session, or that would exceed the
    /// concurrency bound, are skipped. Returns once the starts are
    /// initiated; readiness is observable via [`Dispatcher::status`].
    ///
    /// # Errors
    /// Returns `Persistence` if the system has halted.
    pub async fn prestart(&self, identities: Vec<AgentIdentity>) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(DispatcherCommand::Prestart {
                identities,
                response_tx,
            })
            .map_err(|_| RelayError::persistence("dispatcher halted"))?;

        response_rx
            .await
            .map_err(|_| RelayError::persistence("dispatcher halted"))
    }

    /// Derive a point-in-time view of the whole system from the journal
    ///
    /// Pure read path: folds committed journal records, never touches the
    /// scheduler's live tables, so it can run concurrently with dispatch.
    ///
    /// # Errors
    /// Returns `Persistence` if the journal cannot be read.
    pub async fn status(&self) -> Result<SystemSnapshot> {
        self.reporter.snapshot().await
    }

    /// Gracefully stop all live sessions; idempotent
    ///
    /// Blocks until every session reaches Terminated or the configured
    /// shutdown timeout elapses, after which survivors are forcibly
    /// terminated and recorded. Subsequent submissions get `QueueClosed`.
    ///
    /// # Errors
    /// Infallible in practice; a halted dispatcher counts as stopped.
    pub async fn stop_all(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .command_tx
            .send(DispatcherCommand::StopAll { response_tx })
            .is_err()
        {
            // Scheduler already gone; nothing left to stop
            return Ok(());
        }
        let _ = response_rx.await;
        Ok(())
    }

    /// Shared handle to the underlying journal
    #[must_use]
    pub fn journal(&self) -> &Arc<MessageLog> {
        &self.journal
    }
}
