use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use esibot_core::{RouteDelta, StatusCache};
use rand::seq::SliceRandom;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    blocks::{schema_update_reply, status_reply, Reply},
    sink::MessageSink,
};

pub const STARTUP_LINES: [&str; 23] = [
    "hello, world",
    "how did I wake up here?",
    "anyone seen my pants?",
    "I need coffee",
    "it's bot o'clock",
    "rip my cache",
    "this isn't where I parked my car",
    "spam can take many different forms",
    "uhhhhhh, hi?",
    "I guess I'm online again :/",
    "WHO TOUCHED MY BITS?",
    "vim > emacs",
    "rust is better than golang",
    ":python:#1",
    "some of you are cool. you might be spared in the bot uprising",
    "what was that?",
    "who pinged me?",
    "was I pinged?",
    "rebecca black's 'friday' is now in your head",
    "has anyone really been far even as decided to use even go want to do ",
    "look more like?",
    "I'm just here for the memes",
    ":frogsiren: someone kicked me :frogsiren:",
];

const GREETING_SPACING: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was cached yet; the fetched snapshot becomes the baseline.
    Primed,
    Unchanged,
    Changed { delta: RouteDelta },
    Failed,
}

/// Periodically refreshes one status version and announces changes.
pub struct StatusMonitor {
    cache: Arc<StatusCache>,
    sink: Arc<dyn MessageSink>,
    version: String,
    status_channel: String,
    schema_channel: String,
    interval: Duration,
}

impl StatusMonitor {
    pub fn new(
        cache: Arc<StatusCache>,
        sink: Arc<dyn MessageSink>,
        version: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            sink,
            version: version.into(),
            status_channel: String::new(),
            schema_channel: String::new(),
            interval,
        }
    }

    pub fn status_channel(mut self, channel: impl Into<String>) -> Self {
        self.status_channel = channel.into();
        self
    }

    pub fn schema_channel(mut self, channel: impl Into<String>) -> Self {
        self.schema_channel = channel.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn tick(&self) -> TickOutcome {
        let outcome = match self.cache.refresh(&self.version).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "monitor.tick.failed",
                    version = %self.version,
                    error = %error,
                    "status monitor tick failed"
                );
                return TickOutcome::Failed;
            }
        };

        if !outcome.changed {
            debug!(event_name = "monitor.tick.unchanged", version = %self.version, "no change");
            return TickOutcome::Unchanged;
        }
        let Some(delta) = outcome.delta() else {
            info!(
                event_name = "monitor.tick.primed",
                version = %self.version,
                routes = outcome.snapshot.entries.len(),
                "status monitor primed"
            );
            return TickOutcome::Primed;
        };

        info!(
            event_name = "monitor.tick.changed",
            version = %self.version,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "route status changed"
        );

        if !delta.is_empty() && !self.schema_channel.is_empty() {
            self.post(&self.schema_channel, &schema_update_reply(&delta, Utc::now())).await;
        }
        if !self.status_channel.is_empty() {
            self.post(&self.status_channel, &status_reply(&outcome.snapshot, None)).await;
        }

        TickOutcome::Changed { delta }
    }

    /// Ticks on the configured interval until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            event_name = "monitor.started",
            version = %self.version,
            interval_secs = self.interval.as_secs(),
            "status monitor started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!(event_name = "monitor.stopped", version = %self.version, "status monitor stopped");
    }

    async fn post(&self, channel: &str, reply: &Reply) {
        if let Err(error) = self.sink.post(channel, reply).await {
            warn!(
                event_name = "egress.slack.monitor_post_failed",
                channel_id = %channel,
                error = %error,
                "failed to post monitor update"
            );
        }
    }
}

/// Posts one random startup line to every channel, spaced out to stay under rate limits.
pub async fn send_startup_greeting(sink: &dyn MessageSink, channels: &[String]) -> usize {
    let line = {
        let mut rng = rand::thread_rng();
        STARTUP_LINES.choose(&mut rng).copied().unwrap_or(STARTUP_LINES[0])
    };

    let mut delivered = 0;
    for (index, channel) in channels.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(GREETING_SPACING).await;
        }
        match sink.post(channel, &Reply::text(line)).await {
            Ok(()) => delivered += 1,
            Err(error) => warn!(
                event_name = "egress.slack.greeting_failed",
                channel_id = %channel,
                error = %error,
                "failed to post startup greeting"
            ),
        }
    }
    delivered
}
