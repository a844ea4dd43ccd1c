use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use parley_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use parley_core::model::{ChatMessage, MessageType};
use parley_rest::ChatApi;
use parley_transport::RealtimeLink;

use crate::controller::ConversationController;
use crate::error::ConversationError;

/// Routes outbound messages: optimistic realtime delivery when the link is
/// up, awaited REST delivery otherwise.
///
/// The realtime path returns immediately after inserting the provisional
/// entry; confirmation arrives later as an echoed inbound message carrying
/// the same correlation id.
pub struct SendPipeline {
    api: Arc<dyn ChatApi>,
    link: Arc<dyn RealtimeLink>,
    bus: Arc<dyn EventBus>,
    conversation: Arc<ConversationController>,
    self_user_id: String,
    realtime_enabled: bool,
    /// Guards the REST path only; realtime sends are fire-and-forget and
    /// may overlap freely.
    sending: AtomicBool,
}

impl SendPipeline {
    pub fn new(
        api: Arc<dyn ChatApi>,
        link: Arc<dyn RealtimeLink>,
        bus: Arc<dyn EventBus>,
        conversation: Arc<ConversationController>,
        self_user_id: impl Into<String>,
        realtime_enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            link,
            bus,
            conversation,
            self_user_id: self_user_id.into(),
            realtime_enabled,
            sending: AtomicBool::new(false),
        })
    }

    pub async fn send(
        &self,
        chat_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<(), ConversationError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }

        if self.realtime_enabled && self.link.is_connected() {
            self.send_realtime(chat_id, content, message_type);
            Ok(())
        } else {
            self.send_rest(chat_id, content, message_type).await
        }
    }

    fn send_realtime(&self, chat_id: &str, content: &str, message_type: MessageType) {
        let client_ref = Uuid::new_v4().to_string();
        let provisional = ChatMessage::provisional(
            chat_id,
            &self.self_user_id,
            content,
            message_type,
            &client_ref,
        );
        debug!(chat_id, client_ref = %client_ref, "sending over realtime link");

        self.link
            .send_message(chat_id, content, message_type, &client_ref);
        self.conversation.insert_provisional(provisional.clone());
        self.notify(
            "chat.message.sent",
            EventPayload::MessageSent {
                message: provisional,
            },
        );
    }

    async fn send_rest(
        &self,
        chat_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<(), ConversationError> {
        if self.sending.swap(true, Ordering::SeqCst) {
            return Err(ConversationError::SendInProgress);
        }
        debug!(chat_id, "sending over rest fallback");

        // The chat list preview moves when the send is initiated, not
        // when the server confirms.
        let preview = ChatMessage::provisional(
            chat_id,
            &self.self_user_id,
            content,
            message_type,
            &Uuid::new_v4().to_string(),
        );
        self.notify("chat.message.sent", EventPayload::MessageSent { message: preview });

        let result = self.api.send_message(chat_id, content, message_type).await;
        self.sending.store(false, Ordering::SeqCst);

        match result {
            Ok(message) => {
                self.conversation.confirm_send(message);
                Ok(())
            }
            Err(e) => {
                error!(chat_id, error = %e, "rest send failed");
                self.notify(
                    "system.error.occurred",
                    EventPayload::ErrorOccurred {
                        component: "send".into(),
                        message: e.to_string(),
                        recoverable: true,
                    },
                );
                Err(e.into())
            }
        }
    }

    fn notify(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self.bus.publish(Event::new(
            channel,
            EventSource::System("messages".into()),
            payload,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{confirmed_message, mock_api, FakeLink, MockApi};
    use std::time::Duration;

    use tokio::time::timeout;

    use parley_core::event::BroadcastEventBus;
    use parley_core::model::DeliveryState;
    use parley_rest::{MessagePage, RestError};

    struct Setup {
        pipeline: Arc<SendPipeline>,
        conversation: Arc<ConversationController>,
        link: Arc<FakeLink>,
        bus: Arc<BroadcastEventBus>,
    }

    async fn setup(api: MockApi, connected: bool) -> Setup {
        let api: Arc<dyn ChatApi> = Arc::new(api);
        let link = Arc::new(FakeLink::new(connected));
        let link_dyn: Arc<dyn RealtimeLink> = link.clone();
        let bus = Arc::new(BroadcastEventBus::default());
        let events: Arc<dyn EventBus> = bus.clone();
        let conversation = ConversationController::new(
            api.clone(),
            link_dyn.clone(),
            events.clone(),
            "user-1",
            50,
        );
        conversation.open_chat("chat-1").await.unwrap();
        let pipeline = SendPipeline::new(api, link_dyn, events, conversation.clone(), "user-1", true);
        Setup {
            pipeline,
            conversation,
            link,
            bus,
        }
    }

    fn empty_history_api() -> MockApi {
        let mut api = mock_api();
        api.expect_list_messages().returning(|_, _, _| {
            Ok(MessagePage {
                messages: vec![],
                current_page: 1,
                total_pages: 1,
            })
        });
        api
    }

    #[tokio::test]
    async fn connected_send_takes_realtime_path_with_provisional_entry() {
        let setup = setup(empty_history_api(), true).await;
        let mut sub = setup.bus.subscribe("chat.message.sent").unwrap();

        setup
            .pipeline
            .send("chat-1", "hello", MessageType::Text)
            .await
            .unwrap();

        let frames = setup.link.sent();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].content, "hello");
        assert!(!frames[0].client_ref.is_empty());

        let messages = setup.conversation.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_provisional());
        assert_eq!(messages[0].delivery, DeliveryState::Pending);
        assert_eq!(messages[0].client_ref.as_deref(), Some(frames[0].client_ref.as_str()));

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert!(matches!(event.payload, EventPayload::MessageSent { .. }));
    }

    #[tokio::test]
    async fn disconnected_send_takes_rest_path() {
        let mut api = empty_history_api();
        api.expect_send_message()
            .returning(|chat_id, content, _| Ok(confirmed_message("msg-1", chat_id, "user-1", content)));
        let setup = setup(api, false).await;

        setup
            .pipeline
            .send("chat-1", "hello", MessageType::Text)
            .await
            .unwrap();

        assert!(setup.link.sent().is_empty());
        let messages = setup.conversation.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "msg-1");
        assert_eq!(messages[0].delivery, DeliveryState::Confirmed);
    }

    #[tokio::test]
    async fn rest_failure_is_rethrown_and_announced() {
        let mut api = empty_history_api();
        api.expect_send_message().returning(|_, _, _| {
            Err(RestError::Status {
                status: 503,
                message: "unavailable".into(),
            })
        });
        let setup = setup(api, false).await;
        let mut sub = setup.bus.subscribe("system.error.*").unwrap();

        let result = setup.pipeline.send("chat-1", "hello", MessageType::Text).await;

        assert!(result.is_err());
        assert!(setup.conversation.messages().is_empty());
        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::ErrorOccurred { recoverable: true, .. }
        ));
    }

    #[tokio::test]
    async fn rest_send_announces_before_confirmation() {
        let mut api = empty_history_api();
        api.expect_send_message().returning(|_, _, _| {
            Err(RestError::Status {
                status: 503,
                message: "unavailable".into(),
            })
        });
        let setup = setup(api, false).await;
        let mut sub = setup.bus.subscribe("chat.message.sent").unwrap();

        let result = setup.pipeline.send("chat-1", "hello", MessageType::Text).await;

        // Even a failed REST send has already moved the chat list preview.
        assert!(result.is_err());
        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        match event.payload {
            EventPayload::MessageSent { message } => {
                assert_eq!(message.content, "hello");
                assert_eq!(message.delivery, DeliveryState::Pending);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_content_is_dropped() {
        let setup = setup(empty_history_api(), true).await;

        setup
            .pipeline
            .send("chat-1", "   ", MessageType::Text)
            .await
            .unwrap();

        assert!(setup.link.sent().is_empty());
        assert!(setup.conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn realtime_disabled_forces_rest_even_when_connected() {
        let mut api = empty_history_api();
        api.expect_send_message()
            .returning(|chat_id, content, _| Ok(confirmed_message("msg-1", chat_id, "user-1", content)));
        let api: Arc<dyn ChatApi> = Arc::new(api);
        let link = Arc::new(FakeLink::new(true));
        let link_dyn: Arc<dyn RealtimeLink> = link.clone();
        let bus = Arc::new(BroadcastEventBus::default());
        let events: Arc<dyn EventBus> = bus.clone();
        let conversation =
            ConversationController::new(api.clone(), link_dyn.clone(), events.clone(), "user-1", 50);
        conversation.open_chat("chat-1").await.unwrap();
        let pipeline =
            SendPipeline::new(api, link_dyn, events, conversation.clone(), "user-1", false);

        pipeline.send("chat-1", "hello", MessageType::Text).await.unwrap();

        assert!(link.sent().is_empty());
        assert_eq!(conversation.messages()[0].id, "msg-1");
    }

    #[tokio::test]
    async fn rest_confirmation_replaces_stale_provisional() {
        // A realtime send left a pending entry behind, then the user went
        // offline and resent over REST; the confirmation reconciles the
        // stale entry by content instead of duplicating it.
        let mut api = empty_history_api();
        api.expect_send_message()
            .returning(|chat_id, content, _| Ok(confirmed_message("msg-1", chat_id, "user-1", content)));
        let setup = setup(api, true).await;

        setup
            .pipeline
            .send("chat-1", "hello", MessageType::Text)
            .await
            .unwrap();
        setup.link.set_connected(false);
        setup
            .pipeline
            .send("chat-1", "hello", MessageType::Text)
            .await
            .unwrap();

        let messages = setup.conversation.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "msg-1");
        assert_eq!(messages[0].delivery, DeliveryState::Confirmed);
    }
}
