//! Single-writer dispatcher for the lobby.
//!
//! Every mutation of the registry and the session happens inside
//! [`Lobby::run`], one [`LobbyEvent`] at a time in arrival order. Network
//! tasks and timers only ever talk to it through its queue.

use crate::registry::ConnectionId;
use crate::router::{Router, TimerAction};
use crate::session::{ScheduledTransition, SessionTimings};
use log::{debug, error, info};
use shared::{SessionSnapshot, SessionStatus};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Events processed by the dispatcher
#[derive(Debug)]
pub enum LobbyEvent {
    Connected {
        outbound: mpsc::Sender<String>,
        reply: oneshot::Sender<ConnectionId>,
    },
    Message {
        id: ConnectionId,
        text: String,
    },
    Disconnected {
        id: ConnectionId,
    },
    TimerElapsed {
        epoch: u64,
        from: SessionStatus,
    },
    EndSession {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cloneable sending side of the dispatcher queue.
#[derive(Debug, Clone)]
pub struct LobbyHandle {
    events: mpsc::Sender<LobbyEvent>,
}

impl LobbyHandle {
    /// Registers a connection. Returns `None` once the dispatcher has stopped.
    pub async fn connect(&self, outbound: mpsc::Sender<String>) -> Option<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyEvent::Connected { outbound, reply }).await;
        rx.await.ok()
    }

    pub async fn message(&self, id: ConnectionId, text: String) {
        self.send(LobbyEvent::Message { id, text }).await;
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        self.send(LobbyEvent::Disconnected { id }).await;
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyEvent::Snapshot { reply }).await;
        rx.await.ok()
    }

    /// Ends a running session. Returns false if nothing was running.
    pub async fn end_session(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyEvent::EndSession { reply }).await;
        rx.await.unwrap_or(false)
    }

    async fn send(&self, event: LobbyEvent) {
        if let Err(e) = self.events.send(event).await {
            error!("Lobby dispatcher is gone, dropping {:?}", e.0);
        }
    }
}

pub struct Lobby {
    router: Router,
    events_rx: mpsc::Receiver<LobbyEvent>,
    // Weak so that timers alone do not keep the dispatcher alive
    events_tx: mpsc::WeakSender<LobbyEvent>,
    pending_timer: Option<JoinHandle<()>>,
}

impl Lobby {
    /// Creates the dispatcher and its handle. The dispatcher does nothing
    /// until [`Lobby::run`] is awaited. A capacity of 0 is raised to 1.
    pub fn new(timings: SessionTimings, queue_capacity: usize) -> (Self, LobbyHandle) {
        let (events_tx, events_rx) = mpsc::channel(queue_capacity.max(1));

        let lobby = Self {
            router: Router::new(timings),
            events_rx,
            events_tx: events_tx.downgrade(),
            pending_timer: None,
        };

        (lobby, LobbyHandle { events: events_tx })
    }

    /// Spawns the dispatcher onto the runtime.
    pub fn spawn(timings: SessionTimings, queue_capacity: usize) -> (LobbyHandle, JoinHandle<()>) {
        let (lobby, handle) = Self::new(timings, queue_capacity);
        let task = tokio::spawn(lobby.run());
        (handle, task)
    }

    /// Processes events until every [`LobbyHandle`] has been dropped.
    pub async fn run(mut self) {
        info!("Lobby dispatcher started");

        while let Some(event) = self.events_rx.recv().await {
            self.dispatch(event);
        }

        if let Some(timer) = self.pending_timer.take() {
            timer.abort();
        }
        info!("Lobby dispatcher stopped");
    }

    fn dispatch(&mut self, event: LobbyEvent) {
        match event {
            LobbyEvent::Connected { outbound, reply } => {
                let id = self.router.connect(outbound);
                if reply.send(id).is_err() {
                    // The connection task went away before learning its id
                    self.router.disconnect(id);
                }
            }
            LobbyEvent::Message { id, text } => {
                self.router.handle_text(id, &text);
            }
            LobbyEvent::Disconnected { id } => {
                self.router.disconnect(id);
            }
            LobbyEvent::TimerElapsed { epoch, from } => {
                self.router.timer_elapsed(epoch, from);
            }
            LobbyEvent::EndSession { reply } => {
                let ended = self.router.end_session();
                let _ = reply.send(ended);
            }
            LobbyEvent::Snapshot { reply } => {
                let _ = reply.send(self.router.snapshot());
            }
        }

        self.apply_timer_action();
    }

    fn apply_timer_action(&mut self) {
        match self.router.take_timer_action() {
            TimerAction::Keep => {}
            TimerAction::Cancel => self.cancel_timer(),
            TimerAction::Schedule(timer) => {
                self.cancel_timer();
                self.pending_timer = Some(self.spawn_timer(timer));
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            timer.abort();
            debug!("Cancelled pending session timer");
        }
    }

    fn spawn_timer(&self, timer: ScheduledTransition) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        debug!(
            "Scheduling {} timer for epoch {} in {:?}",
            timer.from, timer.epoch, timer.delay
        );

        tokio::spawn(async move {
            tokio::time::sleep(timer.delay).await;
            if let Some(events) = events.upgrade() {
                let _ = events
                    .send(LobbyEvent::TimerElapsed {
                        epoch: timer.epoch,
                        from: timer.from,
                    })
                    .await;
            }
        })
    }
}
