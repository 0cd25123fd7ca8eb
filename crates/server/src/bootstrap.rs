use std::{sync::Arc, time::Duration};

use axum::Router;
use esibot_core::{
    config::{AppConfig, ConfigError, LoadOptions},
    EnrichmentFanout, FanoutSettings, PathValidator, RouteTable, StatusCache, UpstreamClient,
};
use esibot_slack::{
    actions::{default_registry, BotServices, BotSettings},
    commands::{CommandDispatcher, RegistryError},
    events::MessageHandler,
    monitor::StatusMonitor,
    sink::MessageSink,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    events_api::{self, EventsState},
    health::{self, HealthState},
    slack_api::SlackWebApi,
    upstream::HttpUpstreamClient,
};

pub struct Application {
    pub config: AppConfig,
    pub route_table: Arc<RouteTable>,
    pub status_cache: Arc<StatusCache>,
    pub sink: Arc<dyn MessageSink>,
    pub handler: Arc<MessageHandler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let user_agent = config.upstream.user_agent.as_str();
    let tranquility: Arc<dyn UpstreamClient> = Arc::new(
        HttpUpstreamClient::new(&config.upstream.tranquility_url, user_agent)
            .map_err(BootstrapError::HttpClient)?,
    );
    let serenity: Arc<dyn UpstreamClient> = Arc::new(
        HttpUpstreamClient::new(&config.upstream.serenity_url, user_agent)
            .map_err(BootstrapError::HttpClient)?,
    );
    let github: Arc<dyn UpstreamClient> = Arc::new(
        HttpUpstreamClient::new(&config.upstream.github_url, user_agent)
            .map_err(BootstrapError::HttpClient)?,
    );

    let upstream_timeout = Duration::from_secs(config.upstream.timeout_secs);
    let route_table = Arc::new(RouteTable::new());
    let status_cache = Arc::new(
        StatusCache::new(Arc::clone(&tranquility), upstream_timeout)
            .with_route_table(Arc::clone(&route_table), config.monitor.version.clone())
            .with_max_age(Duration::from_secs(config.monitor.refresh_interval_secs)),
    );
    let fanout = EnrichmentFanout::new(
        Arc::clone(&tranquility),
        FanoutSettings {
            primary_timeout: upstream_timeout,
            lookup_timeout: Duration::from_secs(config.upstream.lookup_timeout_secs),
            max_concurrent_lookups: config.upstream.max_concurrent_lookups,
        },
    );

    let services = BotServices {
        status_cache: Arc::clone(&status_cache),
        validator: PathValidator::new(Arc::clone(&route_table)),
        fanout,
        tranquility,
        serenity,
        github,
        settings: BotSettings::from_config(&config),
    };
    let registry = default_registry(&services)?;
    info!(
        event_name = "system.bootstrap.registry_built",
        correlation_id = "bootstrap",
        actions = registry.len(),
        "action registry built"
    );

    let slack_client = reqwest::Client::builder()
        .user_agent(config.upstream.user_agent.clone())
        .build()
        .map_err(BootstrapError::HttpClient)?;
    let sink: Arc<dyn MessageSink> = Arc::new(SlackWebApi::new(
        slack_client,
        &config.slack.api_base_url,
        config.slack.bot_token.clone(),
    ));
    let handler = Arc::new(MessageHandler::new(
        config.slack.prefixes.clone(),
        CommandDispatcher::new(registry),
        Arc::clone(&sink),
    ));

    Ok(Application { config, route_table, status_cache, sink, handler })
}

impl Application {
    pub fn router(&self) -> Router {
        events_api::router(EventsState::new(Arc::clone(&self.handler))).merge(health::router(
            HealthState::new(Arc::clone(&self.status_cache), self.config.monitor.version.clone()),
        ))
    }

    /// `None` when the monitor is disabled in config.
    pub fn monitor(&self) -> Option<StatusMonitor> {
        let monitor = &self.config.monitor;
        monitor.enabled.then(|| {
            StatusMonitor::new(
                Arc::clone(&self.status_cache),
                Arc::clone(&self.sink),
                monitor.version.clone(),
                Duration::from_secs(monitor.refresh_interval_secs),
            )
            .status_channel(self.config.slack.status_channel.clone())
            .schema_channel(self.config.slack.schema_channel.clone())
        })
    }

    /// One refresh of the monitored version so path validation works without the monitor.
    pub async fn prime_routes(&self) -> usize {
        let version = &self.config.monitor.version;
        match self.status_cache.refresh(version).await {
            Ok(_) => self.route_table.len(),
            Err(error) => {
                warn!(
                    event_name = "system.bootstrap.route_prime_failed",
                    correlation_id = "bootstrap",
                    version = %version,
                    error = %error,
                    "could not load routes; path commands will be rejected until a refresh succeeds"
                );
                0
            }
        }
    }
}
