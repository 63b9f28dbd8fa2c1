use std::time::Duration;

use serde::Deserialize;

use crate::store::DEFAULT_MAX_TRACKED_NONCES;

/// Key under which [`FormTokenConfig`] is read from Rocket's configuration.
pub const CONFIG_KEY: &str = "form_tokens";

/// Form token policy.
///
/// Read by [`crate::FormTokenFairing`] from the `form_tokens` table, e.g.
///
/// ```toml
/// [default.form_tokens]
/// ttl_secs = 1800
/// single_use = true
/// secret = "<base64, at least 32 bytes>"
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FormTokenConfig {
    /// Lifetime of tokens issued without an explicit TTL.
    pub ttl_secs: u64,
    /// Whether a token is spent by its first successful verification.
    pub single_use: bool,
    /// How long verification waits on the nonce store before rejecting.
    pub store_timeout_ms: u64,
    /// Upper bound on spent nonces tracked in memory.
    pub max_tracked_nonces: usize,
    /// Period of the background sweep of expired nonces.
    pub eviction_interval_secs: u64,
    /// Base64 signing secret. When absent a random one is generated at
    /// startup and tokens do not survive a restart.
    pub secret: Option<String>,
}

impl Default for FormTokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600, // 1 hour
            single_use: true,
            store_timeout_ms: 250,
            max_tracked_nonces: DEFAULT_MAX_TRACKED_NONCES,
            eviction_interval_secs: 60,
            secret: None,
        }
    }
}

impl FormTokenConfig {
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub const fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    #[must_use]
    pub const fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    #[must_use]
    pub const fn with_single_use(mut self, single_use: bool) -> Self {
        self.single_use = single_use;
        self
    }

    #[must_use]
    pub const fn with_store_timeout_ms(mut self, store_timeout_ms: u64) -> Self {
        self.store_timeout_ms = store_timeout_ms;
        self
    }

    #[must_use]
    pub const fn with_max_tracked_nonces(mut self, max_tracked_nonces: usize) -> Self {
        self.max_tracked_nonces = max_tracked_nonces;
        self
    }

    #[must_use]
    pub const fn with_eviction_interval_secs(mut self, eviction_interval_secs: u64) -> Self {
        self.eviction_interval_secs = eviction_interval_secs;
        self
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rocket::figment::{
        providers::{Format, Toml},
        Figment,
    };

    #[test]
    fn defaults() {
        let config = FormTokenConfig::default();
        assert_eq!(config.default_ttl(), Duration::from_secs(3600));
        assert!(config.single_use);
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert!(config.secret.is_none());
    }

    #[test]
    fn builder() {
        let config = FormTokenConfig::default()
            .with_ttl_secs(60)
            .with_single_use(false)
            .with_max_tracked_nonces(10)
            .with_secret("c2VjcmV0");

        assert_eq!(config.default_ttl(), Duration::from_secs(60));
        assert!(!config.single_use);
        assert_eq!(config.max_tracked_nonces, 10);
        assert_eq!(config.secret.as_deref(), Some("c2VjcmV0"));
    }

    #[test]
    fn partial_tables_fill_in_defaults() {
        let figment = Figment::from(Toml::string(
            r#"
            [form_tokens]
            ttl_secs = 900
            single_use = false
            "#,
        ));
        let config: FormTokenConfig = figment.extract_inner(CONFIG_KEY).unwrap();

        assert_eq!(
            config,
            FormTokenConfig::default()
                .with_ttl_secs(900)
                .with_single_use(false)
        );
    }
}
