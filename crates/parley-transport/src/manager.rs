use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use parley_core::auth::TokenSource;
use parley_core::config::SocketConfig;
use parley_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use parley_core::model::{ConnectionStatus, MessageType};

use crate::error::TransportError;
use crate::link::RealtimeLink;
use crate::socket::{SocketSink, SocketStream, SocketTransport};
use crate::wire::{ClientFrame, ServerFrame};

/// Owns the realtime connection lifecycle: connect, reconnect with backoff
/// and room replay, frame dispatch onto the event bus, and teardown.
///
/// The manager is constructed once and injected wherever the realtime link
/// is needed; nothing else touches the socket.
pub struct ConnectionManager<T: SocketTransport> {
    config: SocketConfig,
    tokens: Arc<dyn TokenSource>,
    bus: Arc<dyn EventBus>,
    status_tx: watch::Sender<ConnectionStatus>,
    /// Chats the user is interested in; replayed after every reconnect.
    joined: Mutex<BTreeSet<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    /// Set by `disconnect`; suppresses reconnection when the reader exits.
    shutdown: AtomicBool,
    _transport: PhantomData<fn() -> T>,
}

impl<T: SocketTransport> ConnectionManager<T> {
    pub fn new(config: SocketConfig, tokens: Arc<dyn TokenSource>, bus: Arc<dyn EventBus>) -> Arc<Self> {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Arc::new(Self {
            config,
            tokens,
            bus,
            status_tx,
            joined: Mutex::new(BTreeSet::new()),
            outbound: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            _transport: PhantomData,
        })
    }

    /// A watch handle for the host UI's connection indicator.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Opens the realtime connection. A no-op when realtime is disabled,
    /// no credential is available, or a connection is already up; failures
    /// are logged and retried rather than surfaced to the caller.
    pub async fn connect(self: &Arc<Self>) {
        if !self.config.realtime_enabled {
            debug!("realtime disabled by configuration, not connecting");
            return;
        }
        if *self.status_tx.borrow() != ConnectionStatus::Disconnected {
            debug!("connect requested while already connected or connecting");
            return;
        }
        let Some(token) = self.tokens.bearer_token() else {
            warn!("realtime connect skipped, no credential available");
            return;
        };

        self.shutdown.store(false, Ordering::SeqCst);
        self.status_tx.send_replace(ConnectionStatus::Connecting);

        match T::connect(&self.config.url, &token).await {
            Ok(transport) => {
                if let Err(e) = self.establish(transport).await {
                    warn!(error = %e, "connection dropped during room replay");
                    self.connection_lost(e.to_string());
                }
            }
            Err(e) => {
                warn!(error = %e, url = %self.config.url, "realtime connect failed");
                self.connection_lost(e.to_string());
            }
        }
    }

    /// Closes the connection and suppresses reconnection until the next
    /// explicit `connect`. Safe to call mid-backoff: the status may
    /// already read Disconnected while a reconnect is pending, so the
    /// shutdown flag is raised unconditionally.
    pub fn disconnect(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("disconnect requested but already shut down");
            return;
        }
        self.outbound.lock().expect("lock poisoned").take();
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        self.notify(
            "system.connection.lost",
            EventPayload::ConnectionLost {
                reason: "disconnected by client".into(),
                will_retry: false,
            },
        );
        info!("realtime connection closed");
    }

    /// Wires up a freshly connected transport. Room membership is replayed
    /// before the status flips to Connected, so no caller can observe a
    /// connection that has not rejoined its rooms.
    async fn establish(self: &Arc<Self>, transport: T) -> Result<(), TransportError> {
        let (mut sink, stream) = transport.split();

        let joined: Vec<String> = self.joined.lock().expect("lock poisoned").iter().cloned().collect();
        for chat_id in &joined {
            sink.send(ClientFrame::JoinChat {
                chat_id: chat_id.clone(),
            })
            .await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock().expect("lock poisoned") = Some(tx);

        tokio::spawn(write_frames(rx, sink));
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.read_frames(stream).await });

        self.status_tx.send_replace(ConnectionStatus::Connected);
        self.notify(
            "system.connection.established",
            EventPayload::ConnectionEstablished,
        );
        info!(rejoined = joined.len(), "realtime connection established");
        Ok(())
    }

    async fn read_frames(self: Arc<Self>, mut stream: T::Stream) {
        loop {
            match stream.next_frame().await {
                Some(Ok(frame)) => self.dispatch(frame),
                Some(Err(e)) => warn!(error = %e, "dropping undecodable frame"),
                None => break,
            }
        }

        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        warn!("realtime connection lost");
        self.connection_lost("connection closed by server".into());
    }

    /// Records the drop, tells subscribers, and schedules reconnection.
    fn connection_lost(self: &Arc<Self>, reason: String) {
        self.outbound.lock().expect("lock poisoned").take();
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        self.notify(
            "system.connection.lost",
            EventPayload::ConnectionLost {
                reason,
                will_retry: true,
            },
        );
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.reconnect_loop().await });
    }

    async fn reconnect_loop(self: Arc<Self>) {
        for attempt in 1..=self.config.max_reconnect_attempts {
            let backoff = Duration::from_millis(
                self.config
                    .reconnect_backoff_ms
                    .saturating_mul(1 << (attempt - 1).min(16)),
            );
            sleep(backoff).await;
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if *self.status_tx.borrow() != ConnectionStatus::Disconnected {
                debug!("connection re-established elsewhere, stopping retries");
                return;
            }
            let Some(token) = self.tokens.bearer_token() else {
                warn!("reconnect abandoned, credential no longer available");
                return;
            };

            self.notify(
                "system.connection.reconnecting",
                EventPayload::ConnectionReconnecting { attempt },
            );
            self.status_tx.send_replace(ConnectionStatus::Connecting);

            match T::connect(&self.config.url, &token).await {
                Ok(transport) => match self.establish(transport).await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(attempt, error = %e, "reconnect dropped during room replay");
                        self.status_tx.send_replace(ConnectionStatus::Disconnected);
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    self.status_tx.send_replace(ConnectionStatus::Disconnected);
                }
            }
        }

        error!(
            attempts = self.config.max_reconnect_attempts,
            "giving up on realtime reconnection"
        );
        self.notify(
            "system.error.occurred",
            EventPayload::ErrorOccurred {
                component: "transport".into(),
                message: "realtime connection could not be re-established".into(),
                recoverable: false,
            },
        );
    }

    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::NewMessage {
                chat_id, message, ..
            } => {
                debug!(chat_id = %chat_id, message_id = %message.id, "inbound message");
                self.notify(
                    "chat.message.received",
                    EventPayload::MessageReceived { chat_id, message },
                );
            }
            ServerFrame::UserTyping {
                chat_id,
                user_id,
                is_typing,
            } => self.notify(
                "chat.typing.changed",
                EventPayload::TypingChanged {
                    chat_id,
                    user_id,
                    is_typing,
                },
            ),
            ServerFrame::MessageRead {
                chat_id,
                user_id,
                message_ids,
            } => self.notify(
                "chat.read.acknowledged",
                EventPayload::MessagesRead {
                    chat_id,
                    user_id,
                    message_ids,
                },
            ),
            ServerFrame::UserStatus { user_id, is_online } => self.notify(
                "chat.presence.changed",
                EventPayload::PresenceChanged { user_id, is_online },
            ),
            ServerFrame::Error { message } => {
                error!(message = %message, "server reported realtime error");
                self.notify(
                    "system.error.occurred",
                    EventPayload::ErrorOccurred {
                        component: "socket".into(),
                        message,
                        recoverable: true,
                    },
                );
            }
        }
    }

    fn enqueue(&self, frame: ClientFrame) {
        match self.outbound.lock().expect("lock poisoned").as_ref() {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => debug!("realtime link down, dropping outbound frame"),
        }
    }

    fn notify(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self
            .bus
            .publish(Event::new(channel, EventSource::Socket, payload));
    }
}

impl<T: SocketTransport> RealtimeLink for ConnectionManager<T> {
    fn is_connected(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Connected
    }

    fn join_chat(&self, chat_id: &str) {
        self.joined
            .lock()
            .expect("lock poisoned")
            .insert(chat_id.to_string());
        self.enqueue(ClientFrame::JoinChat {
            chat_id: chat_id.to_string(),
        });
    }

    fn leave_chat(&self, chat_id: &str) {
        self.joined.lock().expect("lock poisoned").remove(chat_id);
        self.enqueue(ClientFrame::LeaveChat {
            chat_id: chat_id.to_string(),
        });
    }

    fn send_message(&self, chat_id: &str, content: &str, message_type: MessageType, client_ref: &str) {
        self.enqueue(ClientFrame::SendMessage {
            chat_id: chat_id.to_string(),
            message: content.to_string(),
            message_type,
            client_ref: client_ref.to_string(),
        });
    }

    fn mark_read(&self, chat_id: &str) {
        self.enqueue(ClientFrame::MarkAsRead {
            chat_id: chat_id.to_string(),
        });
    }

    fn start_typing(&self, chat_id: &str) {
        self.enqueue(ClientFrame::StartTyping {
            chat_id: chat_id.to_string(),
        });
    }

    fn stop_typing(&self, chat_id: &str) {
        self.enqueue(ClientFrame::StopTyping {
            chat_id: chat_id.to_string(),
        });
    }
}

/// Drains the outbound queue into the sink until the queue is dropped or
/// the sink fails; the sink is closed on the way out either way.
async fn write_frames<S: SocketSink>(mut rx: mpsc::UnboundedReceiver<ClientFrame>, mut sink: S) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "failed to write frame, closing writer");
            break;
        }
    }
    let _ = sink.close().await;
}
