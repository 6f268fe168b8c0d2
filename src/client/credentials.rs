//! Request Credentials
//!
//! Supplies the outbound headers (auth and content type) for chat requests.

use crate::config::ProviderConfig;
use crate::error::{GlmError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::collections::HashMap;
use tracing::warn;

/// Source of outbound request headers
pub trait CredentialProvider: Send + Sync {
    fn headers(&self) -> Result<HeaderMap>;
}

/// Bearer-token credentials read from an environment variable, plus any
/// extra headers from the provider config
#[derive(Debug, Clone, Default)]
pub struct BearerCredentials {
    api_key_env: Option<String>,
    extra: HashMap<String, String>,
}

impl BearerCredentials {
    pub fn from_provider(config: &ProviderConfig) -> Self {
        Self {
            api_key_env: config.api_key_env.clone(),
            extra: config.headers.clone(),
        }
    }

    fn api_key(&self) -> Option<String> {
        let env_var = self.api_key_env.as_ref()?;
        std::env::var(env_var).ok().filter(|k| !k.trim().is_empty())
    }
}

impl CredentialProvider for BearerCredentials {
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = self.api_key() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                    .map_err(|e| GlmError::Config(format!("Invalid API key format: {}", e)))?,
            );
        }

        for (key, value) in &self.extra {
            match (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => warn!(header = %key, "skipping invalid configured header"),
            }
        }

        Ok(headers)
    }
}

/// Fixed header set
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders(pub HeaderMap);

impl CredentialProvider for StaticHeaders {
    fn headers(&self) -> Result<HeaderMap> {
        Ok(self.0.clone())
    }
}
