//! Access token supply for new upload sessions
//!
//! Acquiring tokens (OAuth consent, refresh) happens outside this crate.
//! Providers are only consulted when a brand-new session is opened; resuming
//! an existing session needs nothing but its id.

use crate::error::UlmanError;
use async_trait::async_trait;

/// Supplies a bearer token on demand
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, UlmanError>;
}

/// A token obtained ahead of time, e.g. from a flag or environment variable
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, UlmanError> {
        let token = self.0.trim();
        if token.is_empty() {
            return Err(UlmanError::InvalidOperation(
                "An access token is required to start a new upload".to_string(),
            ));
        }
        Ok(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken::new(" ya29.abc \n");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.abc");
        assert_eq!(format!("{:?}", provider), "StaticToken(..)");
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let err = StaticToken::new("   ").access_token().await.unwrap_err();
        assert!(matches!(err, UlmanError::InvalidOperation(_)));
    }
}
