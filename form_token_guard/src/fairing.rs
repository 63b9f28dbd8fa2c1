use std::time::Duration;

use anyhow::Context;
use rocket::{
    fairing::{self, Fairing, Info, Kind},
    figment::Figment,
    futures::future,
    tokio::{self, time::interval},
    Build, Orbit, Rocket,
};
use tracing::{debug, error, info};

use crate::{
    config::{FormTokenConfig, CONFIG_KEY},
    service::FormTokens,
};

/// Sets up [`FormTokens`] as managed state.
///
/// On ignite, reads [`FormTokenConfig`] from the `form_tokens` configuration
/// key (defaults if absent) and loads or generates the signing secret. A bad
/// configuration or secret aborts launch. An already managed [`FormTokens`]
/// is left in place. On liftoff, starts sweeping expired nonces until
/// shutdown.
#[derive(Debug, Default)]
pub struct FormTokenFairing {
    config: Option<FormTokenConfig>,
}

impl FormTokenFairing {
    pub const fn new() -> Self {
        Self { config: None }
    }

    /// Uses `config` instead of reading Rocket's configuration.
    pub const fn with_config(config: FormTokenConfig) -> Self {
        Self {
            config: Some(config),
        }
    }
}

fn load_config(figment: &Figment) -> anyhow::Result<FormTokenConfig> {
    match figment.extract_inner::<FormTokenConfig>(CONFIG_KEY) {
        Ok(config) => Ok(config),
        Err(e) if e.missing() => Ok(FormTokenConfig::default()),
        Err(e) => Err(e).context("invalid form_tokens configuration"),
    }
}

#[async_trait::async_trait]
impl Fairing for FormTokenFairing {
    fn info(&self) -> Info {
        Info {
            name: "Form Tokens",
            kind: Kind::Ignite | Kind::Liftoff,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> fairing::Result {
        if rocket.state::<FormTokens>().is_some() {
            debug!("form tokens already managed");
            return Ok(rocket);
        }
        let loaded = match &self.config {
            Some(config) => Ok(config.clone()),
            None => load_config(rocket.figment()),
        }
        .and_then(FormTokens::from_config);
        match loaded {
            Ok(tokens) => {
                info!(
                    ttl_secs = tokens.config().ttl_secs,
                    single_use = tokens.config().single_use,
                    "form tokens ready"
                );
                Ok(rocket.manage(tokens))
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "could not set up form tokens");
                Err(rocket)
            }
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let Some(tokens) = rocket.state::<FormTokens>() else {
            return;
        };
        let period = tokens.config().eviction_interval();
        if !tokens.config().single_use || period == Duration::ZERO {
            return;
        }
        let store = tokens.store().clone();
        let shutdown = rocket.shutdown();
        let sweep = async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                store.evict_expired().await;
            }
        };
        tokio::spawn(async move {
            future::select(Box::pin(sweep), Box::pin(shutdown)).await;
            debug!("stopped nonce eviction");
        });
    }
}
