//! Run configuration sourced from an explicit environment snapshot.
//!
//! The process environment is captured once at start-up into an
//! [`EnvSnapshot`] and passed by value from there on; nothing below the CLI
//! reads `std::env` directly. Every key is looked up by its plain name first
//! and then under the GitHub Actions input alias `INPUT_<NAME>`, which is how
//! `with:` inputs reach an action's process.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::client::PollPolicy;
use crate::context::Provider;
use crate::error::{Result, ScanError};

/// Backend API key.
pub const API_TOKEN: &str = "API_TOKEN";
/// Backend base URL.
pub const HOST_URL: &str = "DEDGE_HOST_URL";
/// Optional catalogued asset the scan belongs to.
pub const ASSET_ID: &str = "ASSET_ID";
pub const POLL_INTERVAL_SECS: &str = "DEDGE_POLL_INTERVAL_SECS";
pub const POLL_MAX_ATTEMPTS: &str = "DEDGE_POLL_MAX_ATTEMPTS";
pub const POLL_TIMEOUT_SECS: &str = "DEDGE_POLL_TIMEOUT_SECS";

/// Immutable copy of the environment variables visible to one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build a snapshot from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Return a copy with `name` set to `value`.
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    /// Trimmed value of `name`; blank values count as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Like [`get`](Self::get), failing with [`ScanError::MissingVariable`].
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| ScanError::MissingVariable(name.to_string()))
    }

    /// Look `name` up directly, then as the action input `INPUT_<NAME>`.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name)
            .or_else(|| self.get(&format!("INPUT_{}", name.to_uppercase())))
    }

    /// Like [`lookup`](Self::lookup), failing with [`ScanError::MissingVariable`].
    pub fn require_input(&self, name: &str) -> Result<&str> {
        self.lookup(name)
            .ok_or_else(|| ScanError::MissingVariable(name.to_string()))
    }

    fn lookup_u64(&self, name: &str) -> Result<Option<u64>> {
        self.lookup(name)
            .map(|raw| {
                raw.parse::<u64>().map_err(|e| ScanError::InvalidVariable {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

/// Everything a scan run needs besides the SCM context.
#[derive(Clone)]
pub struct ActionConfig {
    /// Backend API key, sent as `X-API-Key`.
    pub api_token: String,
    /// Backend base URL.
    pub host_url: String,
    /// GitHub or GitLab token used for PR/MR comments.
    pub platform_token: Option<String>,
    pub asset_id: Option<String>,
    pub poll: PollPolicy,
}

impl ActionConfig {
    /// Read the configuration for `provider` from the snapshot.
    ///
    /// Fails before any network activity if a required value is missing.
    pub fn from_env(provider: Provider, env: &EnvSnapshot) -> Result<Self> {
        let api_token = env.require_input(API_TOKEN)?.to_string();
        let host_url = env
            .require_input(HOST_URL)?
            .trim_end_matches('/')
            .to_string();
        let platform_token = env.lookup(provider.token_variable()).map(str::to_string);
        let asset_id = env.lookup(ASSET_ID).map(str::to_string);

        let mut poll = PollPolicy::default();
        if let Some(secs) = env.lookup_u64(POLL_INTERVAL_SECS)? {
            poll.interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = env.lookup_u64(POLL_MAX_ATTEMPTS)? {
            poll.max_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        }
        if let Some(secs) = env.lookup_u64(POLL_TIMEOUT_SECS)? {
            poll.timeout = Some(Duration::from_secs(secs));
        }

        Ok(Self {
            api_token,
            host_url,
            platform_token,
            asset_id,
            poll,
        })
    }
}

impl fmt::Debug for ActionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionConfig")
            .field("api_token", &"<redacted>")
            .field("host_url", &self.host_url)
            .field(
                "platform_token",
                &self.platform_token.as_ref().map(|_| "<redacted>"),
            )
            .field("asset_id", &self.asset_id)
            .field("poll", &self.poll)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> EnvSnapshot {
        EnvSnapshot::from_pairs([
            ("API_TOKEN", "key-123"),
            ("DEDGE_HOST_URL", "https://dedge.example.com/"),
        ])
    }

    #[test]
    fn test_blank_values_are_absent() {
        let env = EnvSnapshot::from_pairs([("A", "   "), ("B", " value ")]);
        assert_eq!(env.get("A"), None);
        assert_eq!(env.get("B"), Some("value"));
    }

    #[test]
    fn test_lookup_falls_back_to_action_input() {
        let env = EnvSnapshot::from_pairs([("INPUT_API_TOKEN", "from-input")]);
        assert_eq!(env.lookup("API_TOKEN"), Some("from-input"));

        let env = env.with("API_TOKEN", "from-env");
        assert_eq!(env.lookup("API_TOKEN"), Some("from-env"));
    }

    #[test]
    fn test_config_from_env() {
        let env = base_env()
            .with("GITHUB_TOKEN", "ghp_abc")
            .with("ASSET_ID", "asset-9");
        let config = ActionConfig::from_env(Provider::GitHub, &env).unwrap();

        assert_eq!(config.api_token, "key-123");
        assert_eq!(config.host_url, "https://dedge.example.com");
        assert_eq!(config.platform_token.as_deref(), Some("ghp_abc"));
        assert_eq!(config.asset_id.as_deref(), Some("asset-9"));
        assert_eq!(config.poll, PollPolicy::default());
    }

    #[test]
    fn test_platform_token_follows_provider() {
        let env = base_env().with("GITHUB_TOKEN", "ghp_abc");
        let config = ActionConfig::from_env(Provider::GitLab, &env).unwrap();
        assert!(config.platform_token.is_none());

        let env = env.with("GITLAB_TOKEN", "glpat-1");
        let config = ActionConfig::from_env(Provider::GitLab, &env).unwrap();
        assert_eq!(config.platform_token.as_deref(), Some("glpat-1"));
    }

    #[test]
    fn test_missing_api_token_fails_fast() {
        let env = EnvSnapshot::from_pairs([("DEDGE_HOST_URL", "https://dedge.example.com")]);
        let err = ActionConfig::from_env(Provider::GitHub, &env).unwrap_err();
        assert!(matches!(err, ScanError::MissingVariable(ref name) if name == "API_TOKEN"));
    }

    #[test]
    fn test_missing_host_fails_fast() {
        let env = EnvSnapshot::from_pairs([("API_TOKEN", "key")]);
        let err = ActionConfig::from_env(Provider::GitLab, &env).unwrap_err();
        assert!(matches!(err, ScanError::MissingVariable(ref name) if name == "DEDGE_HOST_URL"));
    }

    #[test]
    fn test_poll_overrides() {
        let env = base_env()
            .with(POLL_INTERVAL_SECS, "5")
            .with(POLL_MAX_ATTEMPTS, "12")
            .with(POLL_TIMEOUT_SECS, "600");
        let config = ActionConfig::from_env(Provider::GitHub, &env).unwrap();

        assert_eq!(config.poll.interval, Duration::from_secs(5));
        assert_eq!(config.poll.max_attempts, 12);
        assert_eq!(config.poll.timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_invalid_poll_value_is_rejected() {
        let env = base_env().with(POLL_INTERVAL_SECS, "soon");
        let err = ActionConfig::from_env(Provider::GitHub, &env).unwrap_err();
        assert!(matches!(err, ScanError::InvalidVariable { .. }));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let env = base_env().with("GITHUB_TOKEN", "ghp_secret");
        let config = ActionConfig::from_env(Provider::GitHub, &env).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("key-123"));
        assert!(!rendered.contains("ghp_secret"));
    }
}
