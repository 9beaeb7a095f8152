// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Live experiment actors.
//!
//! Each non-terminal experiment is driven by one lifecycle loop that owns a
//! command mailbox. The loop is the only writer of the experiment's state:
//! it consults the transition table, persists accepted transitions, and on
//! reaching a terminal state deregisters itself from the registry before
//! exiting.
//!
//! Commands racing with termination are never lost silently: either the
//! loop processes them, or they are answered with an explicit
//! terminal-state error while the mailbox drains.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use crate::error::{CoreError, Result};
use crate::registry::ExperimentRegistry;
use crate::state::State;
use crate::store::ExperimentStore;

/// Lifecycle commands a live experiment accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Activate,
    Pause,
    Cancel,
    Kill,
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<()>>,
}

/// Cloneable handle to a live experiment's mailbox.
///
/// The registry owns the canonical handle; bulk coordination borrows clones
/// for single command dispatches. Once the lifecycle loop has exited, every
/// dispatch fails with a terminal-state error.
#[derive(Debug, Clone)]
pub struct ExperimentHandle {
    id: i32,
    tx: mpsc::Sender<Envelope>,
}

impl ExperimentHandle {
    /// The experiment this handle addresses.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Request activation (paused -> active).
    pub async fn activate(&self) -> Result<()> {
        self.dispatch(Command::Activate).await
    }

    /// Request a pause (active -> paused).
    pub async fn pause(&self) -> Result<()> {
        self.dispatch(Command::Pause).await
    }

    /// Request graceful cancellation. A no-op success if the experiment is
    /// already stopping or terminal.
    pub async fn cancel(&self) -> Result<()> {
        self.dispatch(Command::Cancel).await
    }

    /// Request a forced kill. A no-op success if already being killed or
    /// terminal; escalates a graceful cancel in progress.
    pub async fn kill(&self) -> Result<()> {
        self.dispatch(Command::Kill).await
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            command,
            reply: reply_tx,
        };
        if self.tx.send(envelope).await.is_err() {
            // Mailbox closed: the lifecycle loop already terminated.
            return Err(CoreError::TerminalState { id: self.id });
        }
        reply_rx
            .await
            .unwrap_or(Err(CoreError::TerminalState { id: self.id }))
    }

    /// Handle with no lifecycle loop behind it; every dispatch reports a
    /// terminal state. For registry tests only.
    #[cfg(test)]
    pub(crate) fn detached(id: i32) -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { id, tx }
    }
}

/// Mailbox depth per experiment. Bulk requests dispatch one command at a
/// time, so this only needs to absorb short bursts.
const MAILBOX_CAPACITY: usize = 16;

/// Spawn the lifecycle loop for a non-terminal experiment and register its
/// handle.
///
/// Fails if the experiment is already terminal or already has a live
/// handle.
#[instrument(skip(registry, store))]
pub fn spawn_experiment(
    id: i32,
    initial_state: State,
    registry: Arc<ExperimentRegistry>,
    store: Arc<dyn ExperimentStore>,
) -> Result<ExperimentHandle> {
    if initial_state.is_terminal() {
        return Err(CoreError::TerminalState { id });
    }

    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let handle = ExperimentHandle { id, tx };
    registry.insert(id, handle.clone())?;

    tokio::spawn(lifecycle_loop(id, initial_state, rx, registry, store));
    Ok(handle)
}

/// The terminal state a stopping state resolves to once shutdown work is
/// done. Killed experiments are recorded as canceled.
fn finalized(state: State) -> Option<State> {
    match state {
        State::StoppingCanceled | State::StoppingKilled => Some(State::Canceled),
        State::StoppingCompleted => Some(State::Completed),
        State::StoppingError => Some(State::Error),
        _ => None,
    }
}

fn is_stopping(state: State) -> bool {
    finalized(state).is_some()
}

async fn lifecycle_loop(
    id: i32,
    initial_state: State,
    mut rx: mpsc::Receiver<Envelope>,
    registry: Arc<ExperimentRegistry>,
    store: Arc<dyn ExperimentStore>,
) {
    let mut state = initial_state;

    // Finalization is checked at loop entry, not just after commands, so an
    // experiment restored mid-stop at boot completes its shutdown without
    // waiting for anyone to re-issue a cancel.
    loop {
        if let Some(terminal) = finalized(state) {
            match store.update_experiment_state(id, terminal).await {
                Ok(()) => {
                    state = terminal;
                    debug!(experiment_id = id, state = %state, "experiment finalized");
                    break;
                }
                Err(e) => {
                    // Stay live; the next command retries the persist.
                    warn!(experiment_id = id, error = %e, "failed to persist terminal state");
                }
            }
        }

        let Some(envelope) = rx.recv().await else { break };
        let reply = apply_command(id, &mut state, envelope.command, store.as_ref()).await;
        let _ = envelope.reply.send(reply);
    }

    // Deregister before draining so load() cannot observe a handle whose
    // loop has exited.
    registry.remove(id);
    rx.close();
    while let Ok(envelope) = rx.try_recv() {
        let _ = envelope.reply.send(Err(CoreError::TerminalState { id }));
    }
}

async fn apply_command(
    id: i32,
    state: &mut State,
    command: Command,
    store: &dyn ExperimentStore,
) -> Result<()> {
    let target = match command {
        Command::Activate => State::Active,
        Command::Pause => State::Paused,
        Command::Cancel => State::StoppingCanceled,
        Command::Kill => State::StoppingKilled,
    };

    // Cancel and kill are idempotent: a stop already in flight satisfies
    // the caller's intent.
    match command {
        Command::Cancel if is_stopping(*state) => return Ok(()),
        Command::Kill if *state == State::StoppingKilled => return Ok(()),
        Command::Kill if is_stopping(*state) && !state.can_transition(State::StoppingKilled) => {
            return Ok(());
        }
        _ => {}
    }

    if !state.can_transition(target) {
        return Err(CoreError::InvalidStateTransition {
            id,
            from: *state,
            to: target,
        });
    }

    store.update_experiment_state(id, target).await?;
    *state = target;
    Ok(())
}
