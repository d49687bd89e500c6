use std::collections::HashMap;
use std::thread;

use fedrun_core::ClientConfig;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};
use crate::scheduler::Scheduler;

/// Capacity of the command channel feeding the engine.
const COMMAND_BUFFER: usize = 256;

/// Work delivered to the engine from outside its execution sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// A producer reported an example under its external table name.
    Ingest { table_name: String, payload: Vec<u8> },
    SessionStarted,
    SessionStopped,
}

/// Maps external table names to client names.
///
/// Built once from the client list; names not in it are dropped on ingest.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, String>,
}

impl TableRegistry {
    pub fn from_clients(clients: &[ClientConfig]) -> Self {
        let tables = clients
            .iter()
            .map(|c| (c.table_name.clone(), c.name.clone()))
            .collect();
        Self { tables }
    }

    pub fn resolve(&self, table_name: &str) -> Option<&str> {
        self.tables.get(table_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Cloneable sender side of the engine's command channel.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SchedulerError::EngineStopped)
    }

    pub async fn ingest(&self, table_name: impl Into<String>, payload: Vec<u8>) -> Result<()> {
        self.send(EngineCommand::Ingest {
            table_name: table_name.into(),
            payload,
        })
        .await
    }

    pub async fn session_started(&self) -> Result<()> {
        self.send(EngineCommand::SessionStarted).await
    }

    pub async fn session_stopped(&self) -> Result<()> {
        self.send(EngineCommand::SessionStopped).await
    }

    /// Queue a command without waiting; for callers outside any runtime.
    pub fn try_send(&self, command: EngineCommand) -> Result<()> {
        self.tx
            .try_send(command)
            .map_err(|_| SchedulerError::EngineStopped)
    }
}

/// The daemon's single execution sequence.
///
/// Owns the [`Scheduler`] (and through it the storage manager), and
/// interleaves due attempts with commands from the rest of the process.
/// Nothing it owns is touched from any other task.
pub struct SchedulerEngine {
    scheduler: Scheduler,
    clients: Vec<ClientConfig>,
    registry: TableRegistry,
    commands: mpsc::Receiver<EngineCommand>,
}

impl SchedulerEngine {
    /// Create an engine together with the handle used to feed it.
    pub fn new(scheduler: Scheduler, clients: Vec<ClientConfig>) -> (Self, EngineHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let registry = TableRegistry::from_clients(&clients);
        let engine = Self {
            scheduler,
            clients,
            registry,
            commands,
        };
        (engine, EngineHandle { tx })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true` or its sender
    /// goes away, then closes the store.
    ///
    /// A round in progress always finishes before shutdown is observed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(clients = self.clients.len(), "scheduler engine started");
        let clients = std::mem::take(&mut self.clients);
        self.scheduler.schedule(clients);

        loop {
            let has_pending = self.scheduler.pending_attempts() > 0;
            // Queued commands drain before shutdown is honoured.
            tokio::select! {
                biased;
                Some(command) = self.commands.recv() => self.handle(command),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
                Some(index) = self.scheduler.next_due(), if has_pending => {
                    self.scheduler.attempt(index);
                }
            }
        }
        self.scheduler.storage_mut().on_session_stopped();
    }

    fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Ingest {
                table_name,
                payload,
            } => match self.registry.resolve(&table_name) {
                Some(client) => {
                    self.scheduler.storage().ingest(client, &payload);
                }
                None => debug!(table = %table_name, "dropping example for unregistered table"),
            },
            EngineCommand::SessionStarted => self.scheduler.storage_mut().on_session_started(),
            EngineCommand::SessionStopped => self.scheduler.storage_mut().on_session_stopped(),
        }
    }

    /// Run the engine on a dedicated thread with its own single-threaded
    /// runtime, so blocking plugin calls never stall the caller's runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Result<thread::JoinHandle<()>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = thread::Builder::new()
            .name("fedrun-scheduler".into())
            .spawn(move || {
                runtime.block_on(self.run(shutdown));
            })?;
        Ok(handle)
    }
}
