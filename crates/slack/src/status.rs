use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use esibot_core::{
    fetch_with_timeout, CommandError, FetchOptions, StatusCache, UpstreamClient, UpstreamError,
    DEFAULT_VERSION,
};
use serde::Deserialize;
use tracing::warn;

use crate::{
    blocks::{group_thousands, status_reply, AttachmentColor, Reply, ReplyBuilder},
    commands::{ActionHandler, CommandContext, ParsedCommand},
};

pub const SERVER_STATUS_PATH: &str = "/v1/status/";

const INDETERMINATE: &str =
    "Cannot determine server status. It might be offline, or experiencing connectivity issues.";

/// `status [--version=...]`: route health from the cache, refreshed on a miss or once stale.
pub struct StatusAction {
    cache: Arc<StatusCache>,
    status_channel: String,
}

impl StatusAction {
    pub fn new(cache: Arc<StatusCache>, status_channel: impl Into<String>) -> Self {
        Self { cache, status_channel: status_channel.into() }
    }
}

#[async_trait]
impl ActionHandler for StatusAction {
    async fn handle(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        let version = command.flag_value("version").unwrap_or(DEFAULT_VERSION);
        let snapshot = self.cache.get_or_refresh(version).await?;

        let pointer = (!self.status_channel.is_empty() && ctx.channel_id != self.status_channel)
            .then_some(self.status_channel.as_str());
        Ok(status_reply(&snapshot, pointer))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ServerStatus {
    pub players: i64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub vip: Option<bool>,
}

/// Game server status for one cluster.
pub struct ServerStatusAction {
    server: String,
    client: Arc<dyn UpstreamClient>,
    timeout: Duration,
}

impl ServerStatusAction {
    pub fn new(
        server: impl Into<String>,
        client: Arc<dyn UpstreamClient>,
        timeout: Duration,
    ) -> Self {
        Self { server: server.into(), client, timeout }
    }
}

#[async_trait]
impl ActionHandler for ServerStatusAction {
    async fn handle(
        &self,
        _command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        let fetched = fetch_with_timeout(
            self.client.as_ref(),
            SERVER_STATUS_PATH,
            FetchOptions::default(),
            self.timeout,
        )
        .await
        .and_then(|response| response.json::<ServerStatus>());

        let reply = match fetched {
            Ok(status) => server_status_reply(&self.server, &status, Utc::now()),
            Err(UpstreamError::Status { status: 503, .. }) => server_offline_reply(&self.server),
            Err(error) => {
                warn!(
                    event_name = "upstream.server_status.failed",
                    correlation_id = %ctx.correlation_id,
                    server = %self.server,
                    error = %error,
                    "server status could not be determined"
                );
                server_indeterminate_reply(&self.server)
            }
        };
        Ok(reply)
    }
}

pub fn server_status_reply(server: &str, status: &ServerStatus, now: DateTime<Utc>) -> Reply {
    let vip = status.vip.unwrap_or(false);
    let started = status.start_time.format("%a, %d %b %Y %H:%M:%S UTC").to_string();

    ReplyBuilder::new("")
        .attachment(|attachment| {
            attachment
                .color(if vip { AttachmentColor::Warning } else { AttachmentColor::Good })
                .title(format!("{server} status"))
                .field("Players Online", group_thousands(status.players), false)
                .field("Started At", started.clone(), true)
                .field("Running For", running_for(status.start_time, now), true)
                .fallback(format!(
                    "{server} status: {} players online, started at {started}{}",
                    status.players,
                    if vip { ", in VIP" } else { "" }
                ));
        })
        .build()
}

pub fn server_offline_reply(server: &str) -> Reply {
    ReplyBuilder::new("")
        .attachment(|attachment| {
            attachment
                .color(AttachmentColor::Danger)
                .title(format!("{server} status"))
                .text("Offline")
                .fallback(format!("{server} Status: Offline"));
        })
        .build()
}

pub fn server_indeterminate_reply(server: &str) -> Reply {
    ReplyBuilder::new("")
        .attachment(|attachment| {
            attachment
                .color(AttachmentColor::Danger)
                .title(format!("{server} status"))
                .text(INDETERMINATE)
                .fallback(format!("{server} Status: {INDETERMINATE}"));
        })
        .build()
}

fn running_for(started: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - started).num_seconds().max(0);
    format!("{}h {:02}m {:02}s", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}
