//! Presence and typing indicator state.
//!
//! [`PresenceTracker`] keeps the last-write-wins online map and the
//! per-chat typing indicators. Typing state is ephemeral: a remote
//! indicator disappears when no renewing signal arrives within the expiry
//! window, and the local user's own typing signal is auto-stopped the
//! same way. Everything here is cleared on connection loss rather than
//! trusted to be current.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use parley_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use parley_transport::RealtimeLink;

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("event bus error: {0}")]
    EventBus(String),
}

#[derive(Default)]
struct PresenceState {
    online: HashMap<String, bool>,
    /// Remote typing indicators keyed by (chat, user), valued with their
    /// expiry deadline.
    typing: HashMap<(String, String), Instant>,
    /// Chats the local user is currently typing in, with the deadline at
    /// which a stop signal goes out.
    local_typing: HashMap<String, Instant>,
}

pub struct PresenceTracker {
    bus: Arc<dyn EventBus>,
    link: Arc<dyn RealtimeLink>,
    expiry: Duration,
    state: Mutex<PresenceState>,
}

impl PresenceTracker {
    pub fn new(
        bus: Arc<dyn EventBus>,
        link: Arc<dyn RealtimeLink>,
        expiry_seconds: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            link,
            expiry: Duration::from_secs(expiry_seconds),
            state: Mutex::new(PresenceState::default()),
        })
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.state
            .lock()
            .expect("lock poisoned")
            .online
            .get(user_id)
            .copied()
            .unwrap_or(false)
    }

    /// Users currently typing in a chat, expired indicators excluded.
    pub fn typing_users(&self, chat_id: &str) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.lock().expect("lock poisoned");
        let mut users: Vec<String> = state
            .typing
            .iter()
            .filter(|((chat, _), deadline)| chat == chat_id && **deadline > now)
            .map(|((_, user), _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Call on every local keystroke. Sends the start signal on the first
    /// call and pushes the auto-stop deadline out on each renewal.
    pub fn notice_local_typing(&self, chat_id: &str) {
        let deadline = Instant::now() + self.expiry;
        let started = {
            let mut state = self.state.lock().expect("lock poisoned");
            state
                .local_typing
                .insert(chat_id.to_string(), deadline)
                .is_none()
        };
        if started {
            debug!(chat_id, "local typing started");
            self.link.start_typing(chat_id);
        }
    }

    /// Explicit stop, for when the user sends the message or leaves the
    /// chat before the deadline hits.
    pub fn stop_local_typing(&self, chat_id: &str) {
        let was_typing = self
            .state
            .lock()
            .expect("lock poisoned")
            .local_typing
            .remove(chat_id)
            .is_some();
        if was_typing {
            debug!(chat_id, "local typing stopped");
            self.link.stop_typing(chat_id);
        }
    }

    pub fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::PresenceChanged { user_id, is_online } => {
                // Last write wins; frames arrive in connection order.
                self.state
                    .lock()
                    .expect("lock poisoned")
                    .online
                    .insert(user_id.clone(), *is_online);
            }
            EventPayload::TypingChanged {
                chat_id,
                user_id,
                is_typing,
            } => {
                let mut state = self.state.lock().expect("lock poisoned");
                let key = (chat_id.clone(), user_id.clone());
                if *is_typing {
                    state.typing.insert(key, Instant::now() + self.expiry);
                } else {
                    state.typing.remove(&key);
                }
            }
            EventPayload::ConnectionLost { .. } => {
                debug!("connection lost, clearing ephemeral presence state");
                let mut state = self.state.lock().expect("lock poisoned");
                state.online.clear();
                state.typing.clear();
                state.local_typing.clear();
            }
            _ => {}
        }
    }

    /// Purges expired indicators. Remote expiries are republished as stop
    /// signals so UI subscribers do not need their own timers; local
    /// expiries emit the stop frame the server is waiting for.
    fn sweep(&self) {
        let now = Instant::now();
        let (expired_remote, expired_local) = {
            let mut state = self.state.lock().expect("lock poisoned");
            let expired_remote: Vec<(String, String)> = state
                .typing
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired_remote {
                state.typing.remove(key);
            }
            let expired_local: Vec<String> = state
                .local_typing
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(chat, _)| chat.clone())
                .collect();
            for chat in &expired_local {
                state.local_typing.remove(chat);
            }
            (expired_remote, expired_local)
        };

        for (chat_id, user_id) in expired_remote {
            debug!(chat_id, user_id, "typing indicator expired");
            self.notify(
                "chat.typing.changed",
                EventPayload::TypingChanged {
                    chat_id,
                    user_id,
                    is_typing: false,
                },
            );
        }
        for chat_id in expired_local {
            debug!(chat_id, "local typing expired, sending stop");
            self.link.stop_typing(&chat_id);
        }
    }

    /// Subscribes and returns the event loop future. The subscription is
    /// live before this returns, so events published after the call are
    /// seen even if the future is polled later.
    pub fn run(
        self: Arc<Self>,
    ) -> Result<impl std::future::Future<Output = Result<(), PresenceError>>, PresenceError> {
        let mut sub = self
            .bus
            .subscribe("{system,chat}.**")
            .map_err(|e| PresenceError::EventBus(e.to_string()))?;

        Ok(async move {
            let mut sweep = tokio::time::interval(Duration::from_secs(1));
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    result = sub.recv() => match result {
                        Ok(event) => self.handle_event(&event),
                        Err(parley_core::error::EventBusError::ChannelClosed) => {
                            debug!("event bus closed, presence tracker stopping");
                            return Ok(());
                        }
                        Err(parley_core::error::EventBusError::Lagged(count)) => {
                            warn!(count, "presence tracker lagged, some events dropped");
                        }
                        Err(e) => {
                            error!(error = %e, "presence tracker subscription error");
                            return Err(PresenceError::EventBus(e.to_string()));
                        }
                    },
                    _ = sweep.tick() => self.sweep(),
                }
            }
        })
    }

    fn notify(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self.bus.publish(Event::new(
            channel,
            EventSource::System("presence".into()),
            payload,
        ));
    }
}
