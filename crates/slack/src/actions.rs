use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use esibot_core::{
    config::AppConfig, fetch_with_timeout, CommandError, EnrichmentFanout, FetchOptions,
    PathValidator, StatusCache, UpstreamClient, UpstreamError,
};
use serde::Deserialize;

use crate::{
    blocks::{help_reply, issue_reply, IssueKind, Reply, ReplyBuilder},
    commands::{
        help_listing, Action, ActionHandler, ActionRegistry, CommandContext, ParsedCommand,
        RegistryError,
    },
    proxy::{ProxyAction, TypeLookupAction},
    status::{ServerStatusAction, StatusAction},
};

pub const ESI_DOCS: &str = "https://docs.esi.evetech.net";
pub const ESI_ISSUES: &str = "https://github.com/esi/esi-issues";
pub const SSO_ISSUES: &str = "https://github.com/ccpgames/sso-issues";
pub const ESI_WEB_UI: &str = "https://esi.evetech.net/ui/";
pub const ESI_DIFF: &str = "https://esi.evetech.net/diff/latest/dev/";
pub const BOT_SOURCE: &str = "https://github.com/eveisesi/esi-bot-v2";
pub const GITHUB_ISSUES_PATH: &str = "/repos/esi/esi-issues/issues";

pub const STATUS_VERSIONS: [&str; 3] = ["latest", "legacy", "dev"];
pub const LINK_TRIGGERS: [&str; 10] =
    ["faq", "issues", "sso", "webui", "diff", "source", "repo", "id", "ids", "ranges"];
pub const GREETING_TRIGGERS: [&str; 7] = ["hey", "hi", "hello", "o7", "7o", "o/", "\\o"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotSettings {
    pub status_channel: String,
    pub max_payload_bytes: usize,
    pub max_type_ids: usize,
    pub upstream_timeout: Duration,
}

impl BotSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            status_channel: config.slack.status_channel.clone(),
            max_payload_bytes: config.slack.max_payload_bytes,
            max_type_ids: config.upstream.max_type_ids,
            upstream_timeout: Duration::from_secs(config.upstream.timeout_secs),
        }
    }
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            status_channel: String::new(),
            max_payload_bytes: 38_000,
            max_type_ids: 10,
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared collaborators the built-in actions are constructed from.
#[derive(Clone)]
pub struct BotServices {
    pub status_cache: Arc<StatusCache>,
    pub validator: PathValidator,
    pub fanout: EnrichmentFanout,
    pub tranquility: Arc<dyn UpstreamClient>,
    pub serenity: Arc<dyn UpstreamClient>,
    pub github: Arc<dyn UpstreamClient>,
    pub settings: BotSettings,
}

/// Built-in actions in resolution order.
pub fn default_registry(services: &BotServices) -> Result<ActionRegistry, RegistryError> {
    let settings = &services.settings;
    let mut actions = vec![
        Action::exact(
            "status",
            ["status"],
            Arc::new(StatusAction::new(
                Arc::clone(&services.status_cache),
                settings.status_channel.clone(),
            )),
        )
        .allow_flag("version", STATUS_VERSIONS),
        Action::exact(
            "tranquility",
            ["tq", "tranquility"],
            Arc::new(ServerStatusAction::new(
                "Tranquility",
                Arc::clone(&services.tranquility),
                settings.upstream_timeout,
            )),
        ),
        Action::exact(
            "serenity",
            ["serenity", "china"],
            Arc::new(ServerStatusAction::new(
                "Serenity",
                Arc::clone(&services.serenity),
                settings.upstream_timeout,
            )),
        ),
        Action::exact("bug", ["bug", "br"], Arc::new(IssueAction(IssueKind::Bug))),
        Action::exact(
            "feature",
            ["feature", "fr", "enhancement"],
            Arc::new(IssueAction(IssueKind::Feature)),
        ),
        Action::exact(
            "inconsistency",
            ["inconsistency"],
            Arc::new(IssueAction(IssueKind::Inconsistency)),
        ),
        Action::exact("links", LINK_TRIGGERS, Arc::new(LinkAction)),
        Action::exact("greetings", GREETING_TRIGGERS, Arc::new(GreetingAction)),
        Action::exact(
            "types",
            ["type", "types"],
            Arc::new(TypeLookupAction::new(
                services.fanout.clone(),
                settings.max_type_ids,
                settings.max_payload_bytes,
            )),
        ),
        Action::prefix(
            "issue",
            "#",
            Arc::new(GithubIssueAction::new(
                Arc::clone(&services.github),
                settings.upstream_timeout,
            )),
        ),
        Action::prefix(
            "path",
            "/",
            Arc::new(ProxyAction::new(
                services.validator.clone(),
                Arc::clone(&services.tranquility),
                settings.upstream_timeout,
                settings.max_payload_bytes,
            )),
        ),
    ];

    let mut listing = vec!["help".to_owned()];
    listing.extend(help_listing(&actions));
    actions.insert(0, Action::exact("help", ["help"], Arc::new(HelpAction { listing })));

    ActionRegistry::new(actions)
}

pub struct HelpAction {
    listing: Vec<String>,
}

#[async_trait]
impl ActionHandler for HelpAction {
    async fn handle(
        &self,
        _command: &ParsedCommand,
        _ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        Ok(help_reply(&self.listing, true))
    }
}

pub struct IssueAction(pub IssueKind);

#[async_trait]
impl ActionHandler for IssueAction {
    async fn handle(
        &self,
        _command: &ParsedCommand,
        _ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        Ok(issue_reply(ESI_ISSUES, Some(self.0)))
    }
}

pub struct LinkAction;

#[async_trait]
impl ActionHandler for LinkAction {
    async fn handle(
        &self,
        command: &ParsedCommand,
        _ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        let reply = match command.trigger.as_str() {
            "id" | "ids" | "ranges" => ReplyBuilder::new(format!(
                "ID Ranges References: \n\t\t{ESI_DOCS}/docs/id_ranges\nAsset `location_id` reference:\n\t\t{ESI_DOCS}/docs/asset_location_id"
            ))
            .unfurl_links(true)
            .build(),
            "source" | "repo" => ReplyBuilder::new(BOT_SOURCE).unfurl_links(true).build(),
            "faq" => Reply::text(format!("{ESI_DOCS}/docs/FAQ")),
            "issues" => ReplyBuilder::new(ESI_ISSUES).unfurl_links(true).build(),
            "sso" => ReplyBuilder::new(SSO_ISSUES).unfurl_links(true).build(),
            "webui" => Reply::text(ESI_WEB_UI),
            "diff" => Reply::text(ESI_DIFF),
            other => {
                return Err(CommandError::CommandNotFound { trigger: other.to_owned() });
            }
        };
        Ok(reply)
    }
}

pub struct GreetingAction;

#[async_trait]
impl ActionHandler for GreetingAction {
    async fn handle(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        let who = match command.args.as_slice() {
            [target] => target.clone(),
            _ => format!("<@{}>", ctx.user_id),
        };

        let text = match command.trigger.as_str() {
            "o7" | "o/" => format!("o7 {who}"),
            "7o" | "\\o" => format!("7o {who}"),
            _ => format!("hey {who}, hows it goin?"),
        };
        Ok(Reply::text(text))
    }
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    html_url: String,
}

/// `#123` looks the issue up on the ESI issue tracker through the GitHub API.
///
/// Moved, missing and deleted issues reply with the status line alone.
pub struct GithubIssueAction {
    client: Arc<dyn UpstreamClient>,
    timeout: Duration,
}

impl GithubIssueAction {
    pub fn new(client: Arc<dyn UpstreamClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ActionHandler for GithubIssueAction {
    async fn handle(
        &self,
        command: &ParsedCommand,
        _ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        let raw = command.trigger.trim_start_matches('#');
        let number = raw.parse::<u32>().map_err(|_| {
            CommandError::BadArguments(format!("`{raw}` is not a valid issue number"))
        })?;

        let path = format!("{GITHUB_ISSUES_PATH}/{number}");
        match fetch_with_timeout(self.client.as_ref(), &path, FetchOptions::default(), self.timeout)
            .await
        {
            Ok(response) => {
                let issue = response.json::<GithubIssue>()?;
                Ok(ReplyBuilder::new(format!(
                    "{}\n\n{}",
                    status_line(response.status),
                    issue.html_url
                ))
                .unfurl_links(true)
                .build())
            }
            Err(UpstreamError::Status { status: status @ (301 | 404 | 410), .. }) => {
                Ok(Reply::text(status_line(status)))
            }
            Err(error) => Err(error.into()),
        }
    }
}

fn status_line(status: u16) -> String {
    let reason = match status {
        200 => "OK",
        301 => "Moved Permanently",
        404 => "Not Found",
        410 => "Gone",
        _ => "",
    };
    format!("{status} {reason}").trim_end().to_owned()
}
