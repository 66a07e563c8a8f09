//! Background upload worker.
//!
//! One long-lived task owns every [`UploadSession`], keyed by session id. It
//! takes [`Command`]s from the front end and reports [`Event`]s back. Each
//! running session is moved into its own coordinator task and handed back
//! through an internal channel when it stops, so a session always has exactly
//! one owner and the session map needs no lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use chunkline_protocol::constants::META_FILENAME;
use chunkline_protocol::{
    Command, CompletePayload, ErrorPayload, Event, SessionStatus, StartPayload,
};
use chunkline_transfer::{SpeedCalculator, UploadSession};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::coordinator::{Control, Coordinator};
use crate::error::ClientError;
use crate::transport::UploadTransport;

/// Generates a session id of the form `upload_<millis>_<random>`.
pub fn generate_session_id() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("upload_{}_{random}", Utc::now().timestamp_millis())
}

/// Unstarted upload worker.
pub struct UploadWorker {
    transport: Arc<dyn UploadTransport>,
    config: ClientConfig,
}

impl UploadWorker {
    pub fn new(transport: Arc<dyn UploadTransport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// Spawns the worker task on the current tokio runtime.
    pub fn start(self) -> WorkerHandle {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(256);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = Actor {
            coordinator: Arc::new(Coordinator::new(
                self.transport,
                self.config.retry_policy(),
                events_tx.clone(),
            )),
            config: self.config,
            sessions: HashMap::new(),
            events: events_tx,
            finished_tx,
            finished_rx,
        };
        let task = tokio::spawn(actor.run(commands_rx, cancel.clone()));

        WorkerHandle {
            commands: commands_tx,
            events_rx: Some(events_rx),
            cancel,
            task,
        }
    }
}

/// Front-end side of a running worker.
pub struct WorkerHandle {
    commands: mpsc::Sender<Command>,
    events_rx: Option<mpsc::Receiver<Event>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queues a command. Returns immediately; results arrive as events.
    pub async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::WorkerStopped)
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<Event>> {
        self.events_rx.take()
    }

    /// Pauses every running session and waits for the worker to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "upload worker task failed");
        }
    }
}

enum Slot {
    Idle(UploadSession),
    /// Owned by a coordinator task; only its control channel stays here.
    /// `queued` holds a RESUME (`Control::Run`) or CANCEL that arrived after
    /// the coordinator was told to stop, applied once the session is back.
    Running {
        control: watch::Sender<Control>,
        queued: Option<Control>,
    },
}

impl Slot {
    fn running(control: watch::Sender<Control>) -> Self {
        Slot::Running {
            control,
            queued: None,
        }
    }
}

struct Actor {
    coordinator: Arc<Coordinator>,
    config: ClientConfig,
    sessions: HashMap<String, Slot>,
    events: mpsc::Sender<Event>,
    finished_tx: mpsc::UnboundedSender<UploadSession>,
    finished_rx: mpsc::UnboundedReceiver<UploadSession>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        info!("upload worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(session) = self.finished_rx.recv() => self.park(session).await,
            }
        }
        self.shutdown().await;
    }

    async fn handle(&mut self, command: Command) {
        debug!(session = %command.session_id(), command = command.kind(), "worker command");
        match command {
            Command::Start {
                session_id,
                payload,
            } => self.start(session_id, payload).await,
            Command::Pause { session_id } => self.pause(&session_id),
            Command::Resume { session_id } => self.resume(&session_id).await,
            Command::Cancel { session_id } => self.cancel(&session_id),
            Command::Remove { session_id } => self.remove(&session_id),
        }
    }

    async fn start(&mut self, session_id: String, payload: StartPayload) {
        if self.sessions.contains_key(&session_id) {
            warn!(session = %session_id, "session already exists, ignoring START");
            return;
        }

        let total_bytes = match tokio::fs::metadata(&payload.path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                self.reject(session_id, format!("{} is not a file", payload.path.display()))
                    .await;
                return;
            }
            Err(e) => {
                self.reject(
                    session_id,
                    format!("cannot read {}: {e}", payload.path.display()),
                )
                .await;
                return;
            }
        };

        let mut metadata = payload.metadata;
        if !metadata.contains_key(META_FILENAME)
            && let Some(name) = payload.path.file_name().and_then(|n| n.to_str())
        {
            metadata.insert(META_FILENAME.into(), name.into());
        }
        let endpoint = payload
            .endpoint
            .unwrap_or_else(|| self.config.endpoint.clone());

        let mut session = UploadSession::new(
            session_id,
            payload.path,
            endpoint,
            total_bytes,
            self.config.chunk_size,
            metadata,
        )
        .with_speed_calculator(SpeedCalculator::new(Some(
            self.config.speed_sample_interval(),
        )));
        if let Some(url) = payload.upload_url {
            session.set_upload_url(url);
        }

        info!(
            session = %session.id(),
            path = %session.path().display(),
            total_bytes,
            resuming = session.upload_url().is_some(),
            "starting upload"
        );
        self.launch(session);
    }

    fn pause(&mut self, session_id: &str) {
        match self.sessions.get_mut(session_id) {
            Some(Slot::Running { queued: Some(Control::Cancel), .. }) => {
                warn!(session = %session_id, "cancel pending, ignoring PAUSE");
            }
            Some(Slot::Running { control, queued }) => {
                *queued = None;
                let _ = control.send(Control::Pause);
            }
            Some(Slot::Idle(session)) => {
                warn!(session = %session_id, status = %session.status(), "session not running, ignoring PAUSE");
            }
            None => warn!(session = %session_id, "unknown session, ignoring PAUSE"),
        }
    }

    async fn resume(&mut self, session_id: &str) {
        if let Some(Slot::Running { control, queued }) = self.sessions.get_mut(session_id) {
            if *control.borrow() == Control::Pause {
                // The coordinator may already be on its way back.
                debug!(session = %session_id, "session still stopping, RESUME queued");
                *queued = Some(Control::Run);
            } else {
                warn!(session = %session_id, "session is running, ignoring RESUME");
            }
            return;
        }

        match self.sessions.remove(session_id) {
            Some(Slot::Idle(session))
                if matches!(session.status(), SessionStatus::Paused | SessionStatus::Error) =>
            {
                self.relaunch(session).await;
            }
            Some(slot) => {
                warn!(session = %session_id, "session cannot be resumed, ignoring RESUME");
                self.sessions.insert(session_id.to_string(), slot);
            }
            None => warn!(session = %session_id, "unknown session, ignoring RESUME"),
        }
    }

    fn cancel(&mut self, session_id: &str) {
        match self.sessions.remove(session_id) {
            Some(Slot::Running { control, .. }) => {
                let _ = control.send(Control::Cancel);
                self.sessions.insert(
                    session_id.to_string(),
                    Slot::Running {
                        control,
                        queued: Some(Control::Cancel),
                    },
                );
            }
            Some(Slot::Idle(session)) if !session.status().is_terminal() => {
                self.terminate(session);
            }
            Some(slot) => {
                warn!(session = %session_id, "session already finished, ignoring CANCEL");
                self.sessions.insert(session_id.to_string(), slot);
            }
            None => warn!(session = %session_id, "unknown session, ignoring CANCEL"),
        }
    }

    fn remove(&mut self, session_id: &str) {
        match self.sessions.remove(session_id) {
            Some(Slot::Idle(session)) => {
                debug!(session = %session_id, status = %session.status(), "session removed");
            }
            Some(slot @ Slot::Running { .. }) => {
                warn!(session = %session_id, "session is running, ignoring REMOVE");
                self.sessions.insert(session_id.to_string(), slot);
            }
            None => warn!(session = %session_id, "unknown session, ignoring REMOVE"),
        }
    }

    /// Moves `session` into a new coordinator task.
    fn launch(&mut self, mut session: UploadSession) {
        let session_id = session.id().to_string();
        if let Err(e) = session.start() {
            warn!(session = %session_id, error = %e, "cannot start session");
            self.sessions.insert(session_id, Slot::Idle(session));
            return;
        }

        let (control, control_rx) = watch::channel(Control::Run);
        let coordinator = Arc::clone(&self.coordinator);
        let finished = self.finished_tx.clone();
        tokio::spawn(async move {
            let session = coordinator.run(session, control_rx).await;
            let _ = finished.send(session);
        });
        self.sessions.insert(session_id, Slot::running(control));
    }

    async fn relaunch(&mut self, session: UploadSession) {
        let _ = self
            .events
            .send(Event::Resumed {
                session_id: session.id().to_string(),
                payload: session.status_payload(),
            })
            .await;
        self.launch(session);
    }

    /// Terminates a stopped session off the actor loop; it comes back cancelled.
    fn terminate(&mut self, mut session: UploadSession) {
        let session_id = session.id().to_string();
        let (control, _) = watch::channel(Control::Cancel);
        let coordinator = Arc::clone(&self.coordinator);
        let finished = self.finished_tx.clone();
        tokio::spawn(async move {
            coordinator.terminate(&mut session).await;
            let _ = finished.send(session);
        });
        self.sessions.insert(session_id, Slot::running(control));
    }

    /// Takes back a session whose coordinator stopped, reports how it ended,
    /// and applies any RESUME or CANCEL queued while it was stopping.
    async fn park(&mut self, session: UploadSession) {
        let session_id = session.id().to_string();
        let queued = match self.sessions.remove(&session_id) {
            Some(Slot::Running { queued, .. }) => queued,
            _ => None,
        };
        let stopped = matches!(session.status(), SessionStatus::Paused | SessionStatus::Error);
        if queued == Some(Control::Cancel) && stopped {
            debug!(session = %session_id, "applying queued CANCEL");
            self.terminate(session);
            return;
        }

        let event = match session.status() {
            SessionStatus::Completed => Event::Complete {
                session_id: session_id.clone(),
                payload: CompletePayload {
                    location: session.location().unwrap_or_default().to_string(),
                    upload_url: session.upload_url().unwrap_or_default().to_string(),
                    total_bytes: session.total_bytes(),
                },
            },
            SessionStatus::Error => Event::Error {
                session_id: session_id.clone(),
                payload: ErrorPayload {
                    message: session.last_error().unwrap_or("unknown error").to_string(),
                    uploaded_bytes: session.uploaded_offset(),
                    upload_url: session.upload_url().map(str::to_string),
                },
            },
            SessionStatus::Paused => Event::Paused {
                session_id: session_id.clone(),
                payload: session.status_payload(),
            },
            SessionStatus::Cancelled => Event::Cancelled {
                session_id: session_id.clone(),
                payload: session.status_payload(),
            },
            SessionStatus::Pending | SessionStatus::Uploading => {
                warn!(session = %session_id, status = %session.status(), "coordinator returned a live session");
                self.sessions.insert(session_id, Slot::Idle(session));
                return;
            }
        };
        let _ = self.events.send(event).await;

        if queued == Some(Control::Run) && stopped {
            debug!(session = %session_id, "applying queued RESUME");
            self.relaunch(session).await;
        } else if session.status().is_terminal() {
            debug!(session = %session_id, status = %session.status(), "session finished");
        } else {
            self.sessions.insert(session_id, Slot::Idle(session));
        }
    }

    /// Reports a START that never produced a session.
    async fn reject(&self, session_id: String, message: String) {
        warn!(session = %session_id, error = %message, "cannot start upload");
        let _ = self
            .events
            .send(Event::Error {
                session_id,
                payload: ErrorPayload {
                    message,
                    uploaded_bytes: 0,
                    upload_url: None,
                },
            })
            .await;
    }

    async fn shutdown(mut self) {
        let mut running = 0usize;
        for slot in self.sessions.values_mut() {
            if let Slot::Running { control, queued } = slot {
                // Leave a pending cancel in place; everything else stops paused.
                if queued.take() != Some(Control::Cancel) {
                    let _ = control.send(Control::Pause);
                }
                running += 1;
            }
        }
        while running > 0 {
            match self.finished_rx.recv().await {
                Some(session) => {
                    self.park(session).await;
                    running -= 1;
                }
                None => break,
            }
        }
        info!(sessions = self.sessions.len(), "upload worker stopped");
    }
}
