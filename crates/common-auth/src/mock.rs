use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::{AuthError, AuthenticationService};

/// Fixed token table for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuthenticationService {
    tokens: HashMap<String, String>,
    failure: Option<AuthError>,
    delay: Option<Duration>,
}

impl InMemoryAuthenticationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    /// Every validation fails with `error`, regardless of the token table.
    pub fn failing_with(mut self, error: AuthError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Sleep before answering, to exercise caller-side timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl AuthenticationService for InMemoryAuthenticationService {
    async fn validate_token(&self, token: &str) -> Result<Option<String>, AuthError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self.tokens.get(token).cloned())
    }
}
