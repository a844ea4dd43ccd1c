use parley_core::model::MessageType;

/// Fire-and-forget outbound surface of the realtime connection.
///
/// Callers check `is_connected` to choose between the realtime path and
/// their REST fallback; every enqueue method silently drops the frame when
/// the link is down.
pub trait RealtimeLink: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    /// Registers interest in a chat's realtime traffic. Membership is
    /// remembered and re-issued after a reconnect.
    fn join_chat(&self, chat_id: &str);

    fn leave_chat(&self, chat_id: &str);

    fn send_message(&self, chat_id: &str, content: &str, message_type: MessageType, client_ref: &str);

    fn mark_read(&self, chat_id: &str);

    fn start_typing(&self, chat_id: &str);

    fn stop_typing(&self, chat_id: &str);
}
