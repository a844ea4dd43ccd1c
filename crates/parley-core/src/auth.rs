use std::sync::RwLock;

/// Source of the bearer credential attached to REST requests and the
/// realtime handshake.
///
/// Credential storage and refresh are owned by the host application; the
/// core only reads. Returning `None` means the client is unauthenticated
/// and realtime connects become no-ops.
pub trait TokenSource: Send + Sync + 'static {
    fn bearer_token(&self) -> Option<String>;
}

/// An in-process token holder, usable both as a fixture and as the simplest
/// real source when the host keeps the token in memory.
#[derive(Debug, Default)]
pub struct StaticTokenSource {
    token: RwLock<Option<String>>,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// A source with no credential.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.write().expect("lock poisoned") = token;
    }
}

impl TokenSource for StaticTokenSource {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().expect("lock poisoned").clone()
    }
}
