//! Provider API key handling.
//!
//! The key is resolved once from provider options or the environment and
//! then only ever leaves [`ApiCredential`] through [`ApiCredential::expose`].
//! Logs and `Debug` output see a short fingerprint instead.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Option name holding the key in provider settings.
pub const API_KEY_FIELD: &str = "api_key";

/// Environment variable consulted when the options carry no key.
pub const API_KEY_ENV: &str = "BOOKARB_API_KEY";

/// Where the key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// `api_key` in the provider options
    Options,
    /// `BOOKARB_API_KEY`
    Environment,
    /// Passed directly to a constructor
    Inline,
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyOrigin::Options => "options",
            KeyOrigin::Environment => "env",
            KeyOrigin::Inline => "inline",
        };
        f.write_str(s)
    }
}

/// API key for the metered provider.
pub struct ApiCredential {
    key: SecretString,
    origin: KeyOrigin,
}

impl ApiCredential {
    pub fn inline(key: impl Into<String>) -> Self {
        Self::with_origin(key.into(), KeyOrigin::Inline)
    }

    fn with_origin(key: String, origin: KeyOrigin) -> Self {
        Self {
            key: SecretString::from(key),
            origin,
        }
    }

    /// Resolve the key from `options.api_key`, then `BOOKARB_API_KEY`.
    pub fn resolve(options: &JsonValue) -> Result<Self, ProviderError> {
        Self::resolve_with(options, |var| std::env::var(var).ok())
    }

    /// [`resolve`](Self::resolve) with a custom environment lookup.
    ///
    /// Blank values count as missing in both places.
    pub fn resolve_with<F>(options: &JsonValue, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = non_blank(options[API_KEY_FIELD].as_str()) {
            return Ok(Self::with_origin(key.to_string(), KeyOrigin::Options));
        }

        match env(API_KEY_ENV) {
            Some(key) if !key.trim().is_empty() => {
                Ok(Self::with_origin(key, KeyOrigin::Environment))
            }
            _ => Err(ProviderError::NotConfigured(format!(
                "provider API key missing: set '{}' in provider options or {}",
                API_KEY_FIELD, API_KEY_ENV
            ))),
        }
    }

    /// Whether [`resolve`](Self::resolve) would find a key.
    pub fn is_configured(options: &JsonValue) -> bool {
        Self::resolve(options).is_ok()
    }

    /// The raw key, for the request header only.
    pub fn expose(&self) -> &str {
        self.key.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.key.expose_secret().trim().is_empty()
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    /// Last four characters behind a mask; fully masked for short keys.
    pub fn fingerprint(&self) -> String {
        let key = self.key.expose_secret();
        let chars: Vec<char> = key.chars().collect();
        if chars.len() < 8 {
            return "****".to_string();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("****{}", tail)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("key", &self.fingerprint())
            .field("origin", &self.origin)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.fingerprint(), self.origin)
    }
}
