//! Debounced, strictly serialized saving of an open screen.
//!
//! The coordinator is a single tokio task. Edits reach it over an unbounded
//! channel through [`AutosaveHandle`]; it owns the last authoritative
//! [`Version`] and never has more than one save in flight.
//!
//! Phases:
//! - idle: nothing pending, nothing in flight;
//! - pending: an edit is waiting for the debounce deadline, and newer edits
//!   replace it and push the deadline back;
//! - saving: one request is in flight, and edits arriving now are held and
//!   submitted as soon as it resolves, against the version it returned.
//!
//! Every edit carries the store generation it was committed in. Reloading
//! after a conflict starts a new generation, so an edit committed before the
//! reload but delivered after it is dropped instead of overwriting the
//! reloaded document.

use crate::config::{AutosaveConfig, ConflictPolicy};
use crate::graph::{self, GraphState};
use crate::ir::{RawNode, Version};
use crate::persistence::{PersistenceClient, PersistenceError, RemoteDocument};
use crate::session::{DocumentStore, EditorSession};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveEvent {
    /// A debounce deadline was set or pushed back.
    Scheduled,
    /// A save was submitted against `version`.
    Saving { version: Version },
    Saved { version: Version },
    /// The backend rejected a stale write; the screen was reloaded at `version`.
    Conflict { version: Version },
    /// The screen no longer exists on the backend.
    ScreenMissing,
    Failed { message: String },
}

#[derive(Debug)]
enum Command {
    Edit {
        state: Arc<GraphState>,
        generation: u64,
    },
    Flush,
    Shutdown,
}

/// Sending side of the coordinator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AutosaveHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl AutosaveHandle {
    /// Queues `state` as the latest edit. `generation` is the store
    /// generation `state` was committed in. Returns false once the
    /// coordinator has stopped.
    pub fn enqueue(&self, state: Arc<GraphState>, generation: u64) -> bool {
        self.commands
            .send(Command::Edit { state, generation })
            .is_ok()
    }

    /// Skips the rest of the debounce window.
    pub fn flush(&self) -> bool {
        self.commands.send(Command::Flush).is_ok()
    }

    /// Saves whatever is pending, then stops the coordinator.
    pub fn shutdown(&self) -> bool {
        self.commands.send(Command::Shutdown).is_ok()
    }
}

enum SaveOutcome {
    Saved(Version),
    Reloaded(RemoteDocument),
    Missing,
    Failed(String),
}

type SaveFuture = Pin<Box<dyn Future<Output = SaveOutcome> + Send>>;

pub struct Autosaver<C> {
    client: Arc<C>,
    store: DocumentStore,
    config: AutosaveConfig,
    version: Version,
    /// Edits from older generations predate the last reload.
    generation: u64,
    pending: Option<Arc<GraphState>>,
    deadline: Option<Instant>,
    in_flight: Option<SaveFuture>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    closing: bool,
    events: mpsc::UnboundedSender<AutosaveEvent>,
}

impl<C: PersistenceClient> Autosaver<C> {
    /// `version` is the version the store's content was loaded at.
    pub fn new(
        client: Arc<C>,
        store: DocumentStore,
        version: Version,
        config: AutosaveConfig,
    ) -> (Self, AutosaveHandle, mpsc::UnboundedReceiver<AutosaveEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let autosaver = Self {
            client,
            generation: store.generation(),
            store,
            config,
            version,
            pending: None,
            deadline: None,
            in_flight: None,
            commands: command_rx,
            commands_open: true,
            closing: false,
            events: event_tx,
        };
        (autosaver, AutosaveHandle { commands: command_tx }, event_rx)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        debug!(version = %self.version, "autosave started");
        loop {
            let saving = self.in_flight.is_some();
            if !saving && self.closing {
                if self.pending.is_none() {
                    break;
                }
                self.start_save();
                continue;
            }
            let deadline = self.deadline;
            tokio::select! {
                biased;
                command = self.commands.recv(), if self.commands_open => self.on_command(command),
                outcome = wait_for(&mut self.in_flight), if saving => self.on_outcome(outcome),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() && !saving => {
                    self.start_save();
                }
                else => break,
            }
        }
        debug!(version = %self.version, "autosave stopped");
    }

    fn emit(&self, event: AutosaveEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn on_command(&mut self, command: Option<Command>) {
        match command {
            Some(Command::Edit { generation, .. }) if generation < self.generation => {
                debug!(generation, current = self.generation, "dropping edit made before reload");
            }
            Some(Command::Edit { state, .. }) => {
                self.pending = Some(state);
                if self.in_flight.is_none() {
                    self.deadline = Some(Instant::now() + self.config.debounce());
                    self.emit(AutosaveEvent::Scheduled);
                }
            }
            Some(Command::Flush) => {
                if self.in_flight.is_none() {
                    self.start_save();
                }
            }
            Some(Command::Shutdown) => self.closing = true,
            None => {
                self.commands_open = false;
                self.closing = true;
            }
        }
    }

    fn start_save(&mut self) {
        self.deadline = None;
        let Some(state) = self.pending.take() else {
            return;
        };
        let nodes = graph::serialize(&state);
        info!(version = %self.version, roots = nodes.len(), "saving screen");
        self.emit(AutosaveEvent::Saving {
            version: self.version,
        });
        self.in_flight = Some(Box::pin(save_or_reload(
            Arc::clone(&self.client),
            nodes,
            self.version,
        )));
    }

    fn on_outcome(&mut self, outcome: SaveOutcome) {
        self.in_flight = None;
        match outcome {
            SaveOutcome::Saved(version) => {
                info!(%version, "screen saved");
                self.version = version;
                self.emit(AutosaveEvent::Saved { version });
                if self.pending.is_some() {
                    self.start_save();
                }
            }
            SaveOutcome::Reloaded(document) => {
                warn!(version = %document.version, "version conflict, reloaded screen");
                self.version = document.version;
                self.emit(AutosaveEvent::Conflict {
                    version: document.version,
                });
                match (self.config.conflict_policy, self.pending.is_some()) {
                    (ConflictPolicy::ResubmitQueued, true) => self.start_save(),
                    (policy, queued) => {
                        if queued {
                            debug!(?policy, "discarding edit queued behind the conflict");
                        }
                        self.pending = None;
                        if let Some(generation) =
                            self.store.replace(graph::from_node_list(&document.nodes))
                        {
                            self.generation = generation;
                        }
                    }
                }
            }
            SaveOutcome::Missing => {
                warn!("screen no longer exists");
                self.pending = None;
                self.deadline = None;
                self.emit(AutosaveEvent::ScreenMissing);
            }
            SaveOutcome::Failed(message) => {
                warn!(%message, "save failed");
                self.emit(AutosaveEvent::Failed { message });
                if self.pending.is_some() {
                    self.deadline = Some(Instant::now() + self.config.debounce());
                    self.emit(AutosaveEvent::Scheduled);
                }
            }
        }
    }
}

async fn wait_for(in_flight: &mut Option<SaveFuture>) -> SaveOutcome {
    match in_flight {
        Some(save) => save.await,
        None => std::future::pending().await,
    }
}

async fn save_or_reload<C: PersistenceClient>(
    client: Arc<C>,
    nodes: Vec<RawNode>,
    expected: Version,
) -> SaveOutcome {
    match client.replace_screen_nodes(nodes, expected).await {
        Ok(document) => SaveOutcome::Saved(document.version),
        Err(PersistenceError::Conflict { current, .. }) => {
            debug!(%expected, %current, "fetching authoritative screen");
            match client.fetch_screen().await {
                Ok(document) => SaveOutcome::Reloaded(document),
                Err(PersistenceError::NotFound) => SaveOutcome::Missing,
                Err(err) => SaveOutcome::Failed(format!("reload after conflict failed: {err}")),
            }
        }
        Err(PersistenceError::NotFound) => SaveOutcome::Missing,
        Err(err) => SaveOutcome::Failed(err.to_string()),
    }
}

/// An open screen: the editing session, its coordinator task and the event
/// stream the coordinator reports on.
pub struct OpenScreen {
    pub session: EditorSession,
    pub task: JoinHandle<()>,
    pub events: mpsc::UnboundedReceiver<AutosaveEvent>,
}

impl OpenScreen {
    /// Flushes pending edits, waits for the coordinator to stop and returns
    /// every event it reported.
    pub async fn close(mut self) -> Vec<AutosaveEvent> {
        if let Some(autosave) = self.session.autosave() {
            autosave.shutdown();
        }
        drop(self.session);
        if let Err(err) = self.task.await {
            warn!(%err, "autosave task ended abnormally");
        }
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Loads the screen from `client` and starts autosaving edits made through
/// the returned session.
pub async fn open_screen<C: PersistenceClient>(
    client: Arc<C>,
    config: &AutosaveConfig,
) -> Result<OpenScreen, PersistenceError> {
    let document = client.fetch_screen().await?;
    info!(version = %document.version, roots = document.nodes.len(), "screen loaded");
    let store = DocumentStore::new(graph::from_node_list(&document.nodes));
    let (autosaver, handle, events) =
        Autosaver::new(client, store.clone(), document.version, config.clone());
    Ok(OpenScreen {
        session: EditorSession::with_autosave(store, handle),
        task: autosaver.spawn(),
        events,
    })
}
