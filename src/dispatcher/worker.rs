//! Per-session background worker
//!
//! Each live session gets one worker task that owns the boxed host,
//! processes `Deliver`/`Shutdown` commands from the scheduling loop, and
//! appends exactly one journal record per delivery attempt - success or
//! failure - before reporting the outcome back as an event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::commands::{SessionCommand, SessionEvent};
use crate::error::{RelayError, Result};
use crate::host::{Host, HostFactory};
use crate::journal::{LogEntry, MessageLog};
use crate::types::{AgentIdentity, DeliveryOutcome, Task};

/// Everything a worker needs besides its host and channels
pub(super) struct WorkerContext {
    pub identity: AgentIdentity,
    pub journal: Arc<MessageLog>,
    pub readiness_timeout: Duration,
    pub events_tx: mpsc::UnboundedSender<SessionEvent>,
}

/// Spawn the worker task for one session
///
/// The worker starts the host (bounded by the readiness timeout), delivers
/// `first_task` if present, then serves commands until shutdown. Every exit
/// path either emits `Stopped`, `StartFailed`, or `Fatal`, so the scheduler
/// always learns what became of the session.
pub(super) fn spawn_session_worker(
    ctx: WorkerContext,
    factory: Arc<dyn HostFactory>,
    first_task: Option<Task>,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut host = match start_host(&ctx, factory.as_ref()).await {
            Ok(host) => host,
            Err(error) => {
                if let Some(task) = &first_task {
                    // The task still gets its terminal record
                    if let Err(e) = append_failure(&ctx, task) {
                        let _ = ctx.events_tx.send(SessionEvent::Fatal { error: e });
                        return;
                    }
                }
                let _ = ctx.events_tx.send(SessionEvent::StartFailed {
                    identity: ctx.identity.clone(),
                    task: first_task,
                    error,
                });
                return;
            }
        };

        let _ = ctx.events_tx.send(SessionEvent::Ready {
            identity: ctx.identity.clone(),
        });

        let mut healthy = true;
        if let Some(task) = first_task {
            healthy = deliver(&ctx, host.as_mut(), task).await;
        }

        while healthy {
            match command_rx.recv().await {
                Some(SessionCommand::Deliver { task }) => {
                    healthy = deliver(&ctx, host.as_mut(), task).await;
                }
                Some(SessionCommand::Shutdown) | None => break,
            }
        }

        if let Err(e) = host.stop().await {
            log::warn!("[{}] host stop failed: {e}", ctx.identity);
        }
        let _ = ctx.events_tx.send(SessionEvent::Stopped {
            identity: ctx.identity.clone(),
        });
    })
}

/// Create and start the host, bounding readiness by the configured timeout
async fn start_host(ctx: &WorkerContext, factory: &dyn HostFactory) -> Result<Box<dyn Host>> {
    let mut host = factory.create(&ctx.identity).await?;
    match tokio::time::timeout(ctx.readiness_timeout, host.start()).await {
        Ok(Ok(())) => Ok(host),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            let _ = host.stop().await;
            Err(RelayError::readiness_timeout(ctx.identity.as_str()))
        }
    }
}

/// Deliver one task, append its record, and report the outcome
///
/// Returns false when the session must be torn down (delivery failure or
/// fatal journal error); the caller then stops the host.
async fn deliver(ctx: &WorkerContext, host: &mut dyn Host, task: Task) -> bool {
    let task_id = task.id.clone();

    // Reap a dead host before reuse instead of writing into the void
    let result = if host.is_alive() {
        host.deliver(&task.payload).await
    } else {
        Err(RelayError::host_terminated(format!(
            "host for '{}' exited between deliveries",
            ctx.identity
        )))
    };

    match result {
        Ok(outcome) => {
            let entry = LogEntry::delivery(task.source, task.target, task.id, task.payload, outcome);
            if let Err(e) = ctx.journal.append(entry) {
                let _ = ctx.events_tx.send(SessionEvent::Fatal { error: e });
                return false;
            }
            let _ = ctx.events_tx.send(SessionEvent::Delivered {
                identity: ctx.identity.clone(),
                task_id,
                outcome,
            });
            true
        }
        Err(error) => {
            if let Err(e) = append_failure(ctx, &task) {
                let _ = ctx.events_tx.send(SessionEvent::Fatal { error: e });
                return false;
            }
            let _ = ctx.events_tx.send(SessionEvent::DeliveryFailed {
                identity: ctx.identity.clone(),
                task_id,
                error,
            });
            false
        }
    }
}

/// Append the terminal Failed record for a task
fn append_failure(ctx: &WorkerContext, task: &Task) -> Result<()> {
    ctx.journal
        .append(LogEntry::delivery(
            task.source.clone(),
            task.target.clone(),
            task.id.clone(),
            task.payload.clone(),
            DeliveryOutcome::Failed,
        ))
        .map(|_| ())
}
