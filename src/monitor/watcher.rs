//! Stream watcher tasks.
//!
//! One spawned task per stream kind. The task multiplexes a command channel
//! (subscription changes from the coordinator) with the stream itself and
//! forwards normalized ticks into the evaluator channel. Reconnection lives
//! in the stream wrapper; a watcher only hears about a disconnect when the
//! wrapper has given up.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{InstrumentKey, StreamKind, Tick};
use crate::notify::{Event, NotifierRegistry};
use crate::stream::{StreamEvent, TickStream};
use std::sync::Arc;

/// Commands the coordinator sends a running watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherCommand {
    Subscribe(Vec<InstrumentKey>),
    Unsubscribe(Vec<InstrumentKey>),
    Shutdown,
}

/// Handle to a spawned watcher task.
pub struct WatcherHandle {
    kind: StreamKind,
    commands: mpsc::Sender<WatcherCommand>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// False once the task has exited for any reason.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    /// Send a command; returns false when the task is gone.
    pub async fn send(&self, command: WatcherCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Ask the task to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.commands.send(WatcherCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Spawn a watcher over the given stream with an initial subscription set.
pub fn spawn(
    mut stream: Box<dyn TickStream>,
    kind: StreamKind,
    initial: Vec<InstrumentKey>,
    ticks: mpsc::Sender<Tick>,
    notifiers: Arc<NotifierRegistry>,
) -> WatcherHandle {
    let (commands, mut command_rx) = mpsc::channel(16);

    let task = tokio::spawn(async move {
        if let Err(e) = stream.connect().await {
            // The reconnecting wrapper retries inside next_event
            warn!(stream = %kind, error = %e, "Initial connect failed, wrapper will retry");
        }
        if !initial.is_empty() {
            if let Err(e) = stream.subscribe(&initial).await {
                warn!(stream = %kind, error = %e, "Initial subscribe failed");
            }
        }
        info!(stream = %kind, keys = initial.len(), "Watcher started");

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(WatcherCommand::Subscribe(keys)) => {
                        debug!(stream = %kind, keys = keys.len(), "Subscribing");
                        if let Err(e) = stream.subscribe(&keys).await {
                            warn!(stream = %kind, error = %e, "Subscribe failed");
                        }
                    }
                    Some(WatcherCommand::Unsubscribe(keys)) => {
                        debug!(stream = %kind, keys = keys.len(), "Unsubscribing");
                        if let Err(e) = stream.unsubscribe(&keys).await {
                            warn!(stream = %kind, error = %e, "Unsubscribe failed");
                        }
                    }
                    Some(WatcherCommand::Shutdown) | None => {
                        info!(stream = %kind, "Watcher shutting down");
                        break;
                    }
                },
                event = stream.next_event() => match event {
                    Some(StreamEvent::Tick(tick)) => {
                        if ticks.send(tick).await.is_err() {
                            warn!(stream = %kind, "Tick channel closed, stopping watcher");
                            break;
                        }
                    }
                    Some(StreamEvent::Connected) => {
                        debug!(stream = %kind, "Stream connected");
                    }
                    Some(StreamEvent::Disconnected { reason }) => {
                        // Wrapper exhausted its reconnects
                        notifiers.notify_all(Event::StreamDown {
                            kind,
                            reason: reason.clone(),
                        });
                        warn!(stream = %kind, reason = %reason, "Stream disconnected");
                    }
                    None => {
                        notifiers.notify_all(Event::StreamDown {
                            kind,
                            reason: "stream exhausted".to_string(),
                        });
                        warn!(stream = %kind, "Stream exhausted, stopping watcher");
                        break;
                    }
                }
            }
        }
    });

    WatcherHandle {
        kind,
        commands,
        task,
    }
}
