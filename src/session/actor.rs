//! Session actor
//!
//! One task per call. It runs the join, then serialises engine events and
//! user commands against the controller until the call ends. The
//! [`SessionHandle`] is the only way in; dropping it hangs up.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::engine::{EngineEvent, EngineEvents, LocalIdentity, MediaEngine};
use crate::entry::CallTicket;
use crate::error::SessionError;
use crate::session::controller::{SessionController, SessionNotice};
use crate::session::state::{ConnectionState, SessionSnapshot};

type JoinOutcome = Option<Result<LocalIdentity, SessionError>>;

/// Requests from the handle to the actor
#[derive(Debug)]
pub enum SessionCommand {
    ToggleAudio(oneshot::Sender<Result<bool, SessionError>>),
    ToggleVideo(oneshot::Sender<Result<bool, SessionError>>),
    EndCall(oneshot::Sender<()>),
}

/// Start a session for `ticket` on the current runtime
pub fn spawn_session(
    engine: Arc<dyn MediaEngine>,
    config: &AppConfig,
    ticket: CallTicket,
) -> SessionHandle {
    let controller = SessionController::new(engine, config);
    let id = controller.session().id();

    let (commands_tx, commands_rx) = mpsc::channel(config.session.command_queue.max(1));
    let shutdown = CancellationToken::new();
    let (outcome_tx, outcome_rx) = watch::channel(None);
    let snapshots = controller.snapshots();
    let notices = controller.notice_sender();

    let span = tracing::info_span!(
        "session",
        id = %id,
        channel = %ticket.channel,
        role = %ticket.role
    );
    let actor = SessionActor {
        controller,
        commands: commands_rx,
        shutdown: shutdown.clone(),
        outcome: outcome_tx,
        events: None,
        join_timeout: config.session.join_timeout(),
    };
    tokio::spawn(actor.run(ticket).instrument(span));

    SessionHandle {
        id,
        commands: commands_tx,
        _hang_up_on_drop: shutdown.clone().drop_guard(),
        shutdown,
        snapshots,
        notices,
        outcome: outcome_rx,
    }
}

/// Handle to a running session
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    shutdown: CancellationToken,
    _hang_up_on_drop: DropGuard,
    snapshots: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
    outcome: watch::Receiver<JoinOutcome>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest published state of the session
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshots.borrow().state
    }

    /// Receiver that sees every snapshot change
    pub fn watch_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Result of the join, once it is known
    pub async fn join_outcome(&self) -> Result<LocalIdentity, SessionError> {
        let mut outcome = self.outcome.clone();
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        result.unwrap_or(Err(SessionError::Closed))
    }

    /// Wait until the state satisfies `pred`, or the session is gone.
    /// Returns the state last seen.
    pub async fn wait_for_state(&self, pred: impl Fn(ConnectionState) -> bool) -> ConnectionState {
        let mut snapshots = self.snapshots.clone();
        let seen = match snapshots.wait_for(|s| pred(s.state)).await {
            Ok(snapshot) => Some(snapshot.state),
            Err(_) => None,
        };
        seen.unwrap_or_else(|| snapshots.borrow().state)
    }

    /// Returns the new muted state
    pub async fn toggle_audio(&self) -> Result<bool, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(SessionCommand::ToggleAudio(tx), rx).await?
    }

    /// Returns the new muted state
    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.request(SessionCommand::ToggleVideo(tx), rx).await?
    }

    /// Hang up and wait for teardown. Also abandons a join in progress.
    pub async fn end_call(&self) {
        self.shutdown.cancel();
        let (tx, rx) = oneshot::channel();
        if self.request(SessionCommand::EndCall(tx), rx).await.is_err() {
            tracing::debug!(session = %self.id, "Session already closed");
        }
    }

    /// Resolves once the actor has stopped taking commands
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    async fn request<T>(
        &self,
        command: SessionCommand,
        reply: oneshot::Receiver<T>,
    ) -> Result<T, SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)?;
        reply.await.map_err(|_| SessionError::Closed)
    }
}

enum JoinAttempt {
    Acquired(Result<LocalIdentity, SessionError>),
    Cancelled,
    TimedOut(Duration),
}

struct SessionActor {
    controller: SessionController,
    commands: mpsc::Receiver<SessionCommand>,
    shutdown: CancellationToken,
    outcome: watch::Sender<JoinOutcome>,
    events: Option<EngineEvents>,
    join_timeout: Option<Duration>,
}

impl SessionActor {
    async fn run(mut self, ticket: CallTicket) {
        let joined = self.join(&ticket).await;
        let serving = joined.is_ok();
        self.outcome.send_replace(Some(joined));

        if serving {
            self.serve().await;
        }
        self.finish().await;
    }

    async fn join(&mut self, ticket: &CallTicket) -> Result<LocalIdentity, SessionError> {
        let join_timeout = self.join_timeout;
        let deadline = async move {
            match join_timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let (channel, token) = self.controller.begin_join(&ticket.channel, &ticket.token)?;

        // Teardown after a failed acquisition is never raced
        let attempt = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => JoinAttempt::Cancelled,
            limit = deadline => JoinAttempt::TimedOut(limit),
            acquired = self.controller.acquire(&channel, &token) => JoinAttempt::Acquired(acquired),
        };

        match attempt {
            JoinAttempt::Acquired(acquired) => self.controller.finish_join(acquired).await,
            JoinAttempt::Cancelled => {
                self.controller.abandon_join(None).await;
                Err(SessionError::Closed)
            }
            JoinAttempt::TimedOut(limit) => {
                let err = SessionError::JoinTimedOut(limit);
                self.controller.abandon_join(Some(err.clone())).await;
                Err(err)
            }
        }
    }

    async fn serve(&mut self) {
        // Events queued while joining are still in the channel
        self.events = self.controller.take_events();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command).await,
                    None => break,
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.controller.handle_event(event).await,
                    None => {
                        tracing::debug!("Engine event stream closed");
                        self.events = None;
                    }
                },
            }

            if self.controller.state().is_terminal() {
                break;
            }
        }
    }

    async fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::ToggleAudio(reply) => {
                let _ = reply.send(self.controller.toggle_audio().await);
            }
            SessionCommand::ToggleVideo(reply) => {
                let _ = reply.send(self.controller.toggle_video().await);
            }
            SessionCommand::EndCall(reply) => {
                self.controller.end_call().await;
                let _ = reply.send(());
            }
        }
    }

    async fn finish(mut self) {
        self.controller.end_call().await;

        if let Some(mut events) = self.events.take() {
            events.close();
            while let Ok(event) = events.try_recv() {
                self.controller.handle_event(event).await;
            }
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command).await;
        }

        let stats = self.controller.session().stats();
        tracing::info!(
            state = %self.controller.state(),
            events_processed = stats.events_processed,
            events_dropped = stats.events_dropped,
            "Session actor stopped"
        );
    }
}

async fn next_event(events: &mut Option<EngineEvents>) -> Option<EngineEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
