use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::ChatError;

/// Environment variable holding the Groq API key.
pub const API_KEY_VAR: &str = "GROQ_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Secret used to authorize model requests. Never printed.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Look the key up through `lookup`. A missing or blank value is
    /// reported as `ConfigurationMissing`.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChatError> {
        match lookup(API_KEY_VAR) {
            Some(value) if !value.trim().is_empty() => Ok(Self(value.trim().to_string())),
            _ => Err(ChatError::ConfigurationMissing {
                var: API_KEY_VAR.to_string(),
            }),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Settings for the model client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    /// Deadline for a single request, connection included.
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: None,
            system_prompt: None,
        }
    }
}

impl ClientSettings {
    /// Full URL of the chat completion endpoint under `base_url`.
    pub fn completions_url(&self) -> Result<Url, ChatError> {
        let mut base = Url::parse(self.base_url.trim()).map_err(|e| {
            ChatError::ModelInitializationFailed(format!("invalid base URL '{}': {}", self.base_url, e))
        })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ChatError::ModelInitializationFailed(format!(
                "base URL must be http or https: {}",
                self.base_url
            )));
        }

        // Url::join replaces the last segment unless the path ends with '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        base.join("chat/completions").map_err(|e| {
            ChatError::ModelInitializationFailed(format!("invalid base URL '{}': {}", self.base_url, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_configuration_missing() {
        let err = ApiKey::resolve(|_| None).unwrap_err();
        match err {
            ChatError::ConfigurationMissing { var } => assert_eq!(var, API_KEY_VAR),
            other => panic!("Expected ConfigurationMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_key_is_configuration_missing() {
        let err = ApiKey::resolve(|_| Some("  ".to_string())).unwrap_err();
        assert!(matches!(err, ChatError::ConfigurationMissing { .. }));
    }

    #[test]
    fn test_key_is_trimmed_and_redacted() {
        let key = ApiKey::resolve(|name| {
            assert_eq!(name, API_KEY_VAR);
            Some(" gsk_secret\n".to_string())
        })
        .unwrap();

        assert_eq!(key.expose(), "gsk_secret");
        assert!(!format!("{:?}", key).contains("gsk_secret"));
    }

    #[test]
    fn test_completions_url() {
        let settings = ClientSettings::default();
        assert_eq!(
            settings.completions_url().unwrap().as_str(),
            "https://api.groq.com/openai/v1/chat/completions"
        );

        let settings = ClientSettings {
            base_url: "http://127.0.0.1:8080/v1/".to_string(),
            ..ClientSettings::default()
        };
        assert_eq!(
            settings.completions_url().unwrap().as_str(),
            "http://127.0.0.1:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_invalid_base_url_fails_initialization() {
        for base_url in ["not a url", "ftp://example.com/v1", "mailto:someone@example.com"] {
            let settings = ClientSettings {
                base_url: base_url.to_string(),
                ..ClientSettings::default()
            };
            assert!(matches!(
                settings.completions_url(),
                Err(ChatError::ModelInitializationFailed(_))
            ));
        }
    }
}
