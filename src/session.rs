use tokio_util::sync::CancellationToken;

/// A single in-flight load. The token is cancelled when the session is
/// superseded or explicitly cancelled.
#[derive(Debug, Clone)]
pub struct LoadSession {
    pub id: u64,
    pub token: CancellationToken,
}

/// Hands out monotonically numbered sessions; only the latest is current.
#[derive(Debug, Default)]
pub struct SessionTracker {
    current: u64,
    token: Option<CancellationToken>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the current session (if any) and starts a new one.
    pub fn begin(&mut self) -> LoadSession {
        self.cancel();
        self.current += 1;
        let token = CancellationToken::new();
        self.token = Some(token.clone());
        LoadSession {
            id: self.current,
            token,
        }
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.token.is_some() && id == self.current
    }

    pub fn current_id(&self) -> Option<u64> {
        self.token.as_ref().map(|_| self.current)
    }

    /// Cancels the current session. Safe to call repeatedly or after the
    /// session finished.
    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// Marks the current session finished without cancelling its token.
    pub fn complete(&mut self, id: u64) {
        if self.is_current(id) {
            self.token = None;
        }
    }
}
