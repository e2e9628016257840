//! Bearer token acquisition.
//!
//! The platform delegates login/logout and token refresh to an external
//! identity provider; the sync client only ever asks "give me a bearer token
//! or nothing". Requests without a token proceed unauthenticated and the
//! backend answers 401, which surfaces as `SyncError::AuthRequired`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AuthConfig;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, or `None` when no identity is available.
    async fn bearer_token(&self) -> Option<String>;
}

/// Fixed token supplied at construction time (configuration, tests).
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// No identity; every request goes out bare.
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// Build a provider from the configured auth section.
pub fn provider_from_settings(auth: &AuthConfig) -> Arc<dyn TokenProvider> {
    match &auth.token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(NoAuth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken::new("abc");
        assert_eq!(provider.bearer_token().await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_no_auth() {
        assert_eq!(NoAuth.bearer_token().await, None);
    }

    #[tokio::test]
    async fn test_provider_from_settings() {
        let with_token = AuthConfig {
            token: Some("t".into()),
        };
        assert!(provider_from_settings(&with_token)
            .bearer_token()
            .await
            .is_some());

        let without = AuthConfig { token: None };
        assert!(provider_from_settings(&without)
            .bearer_token()
            .await
            .is_none());
    }
}
