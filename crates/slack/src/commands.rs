use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use esibot_core::{CommandError, ErrorSeverity};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::blocks::Reply;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    pub trigger: String,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, String>,
}

impl ParsedCommand {
    pub fn new(trigger: impl Into<String>) -> Self {
        Self { trigger: trigger.into(), ..Self::default() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(key.into(), value.into());
        self
    }

    pub fn flag_value(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundText {
    /// The message does not start with a bot prefix.
    NotAddressed,
    /// Only the prefix was sent.
    HelpRequested,
    Command(ParsedCommand),
}

/// Splits an addressed message into trigger, positional args and `--key=value` flags.
pub fn parse_message_text(text: &str, prefixes: &[String]) -> InboundText {
    let mut tokens = text.split_whitespace();
    let Some(first) = tokens.next() else {
        return InboundText::NotAddressed;
    };
    if !prefixes.iter().any(|prefix| prefix == first) {
        return InboundText::NotAddressed;
    }

    let Some(trigger) = tokens.next() else {
        return InboundText::HelpRequested;
    };

    let mut command = ParsedCommand::new(trigger);
    for token in tokens {
        if let Some(flag) = token.strip_prefix("--") {
            let mut parts = flag.split('=');
            if let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) {
                if !key.is_empty() {
                    command.flags.insert(key.to_owned(), value.to_owned());
                }
            }
            continue;
        }
        command.args.push(token.to_owned());
    }

    InboundText::Command(command)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandContext {
    pub channel_id: String,
    pub user_id: String,
    pub correlation_id: String,
}

impl Default for CommandContext {
    fn default() -> Self {
        Self {
            channel_id: "unknown-channel".to_owned(),
            user_id: "unknown-user".to_owned(),
            correlation_id: "unknown-correlation-id".to_owned(),
        }
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Reply, CommandError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchMode {
    /// Case-sensitive membership in a fixed trigger list.
    Exact(Vec<String>),
    Prefix(String),
}

impl MatchMode {
    pub fn matches(&self, trigger: &str) -> bool {
        match self {
            Self::Exact(triggers) => triggers.iter().any(|candidate| candidate == trigger),
            Self::Prefix(prefix) => trigger.starts_with(prefix.as_str()),
        }
    }

    fn listing(&self, placeholder: &str) -> String {
        match self {
            Self::Exact(triggers) => triggers.join(","),
            Self::Prefix(prefix) => format!("{prefix}<{placeholder}>"),
        }
    }
}

#[derive(Clone)]
pub struct Action {
    name: String,
    mode: MatchMode,
    allowed_flags: BTreeMap<String, BTreeSet<String>>,
    handler: Arc<dyn ActionHandler>,
}

impl Action {
    pub fn exact<I, S>(name: impl Into<String>, triggers: I, handler: Arc<dyn ActionHandler>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            mode: MatchMode::Exact(triggers.into_iter().map(Into::into).collect()),
            allowed_flags: BTreeMap::new(),
            handler,
        }
    }

    pub fn prefix(
        name: impl Into<String>,
        prefix: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            mode: MatchMode::Prefix(prefix.into()),
            allowed_flags: BTreeMap::new(),
            handler,
        }
    }

    /// Declares a flag. An empty `values` list accepts any value.
    pub fn allow_flag<I, S>(mut self, flag: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_flags.insert(flag.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listing(&self) -> String {
        self.mode.listing(&self.name)
    }

    fn validate_flags(&self, command: &ParsedCommand) -> Result<(), CommandError> {
        for (flag, value) in &command.flags {
            let Some(allowed) = self.allowed_flags.get(flag) else {
                return Err(CommandError::UnknownFlag {
                    action: self.name.clone(),
                    flag: flag.clone(),
                });
            };
            if !allowed.is_empty() && !allowed.contains(value) {
                return Err(CommandError::InvalidFlagValue {
                    action: self.name.clone(),
                    flag: flag.clone(),
                    value: value.clone(),
                    allowed: allowed.iter().cloned().collect(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("allowed_flags", &self.allowed_flags)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action `{action}` has no trigger")]
    EmptyTrigger { action: String },
    #[error("trigger `{trigger}` is registered by both `{first}` and `{second}`")]
    DuplicateTrigger { trigger: String, first: String, second: String },
    #[error("prefix `{second_prefix}` of `{second}` overlaps prefix `{first_prefix}` of `{first}`")]
    OverlappingPrefix { first: String, first_prefix: String, second: String, second_prefix: String },
    #[error("trigger `{trigger}` of `{second}` can never match; prefix `{prefix}` of `{first}` claims it")]
    ShadowedTrigger { trigger: String, first: String, prefix: String, second: String },
}

/// Ordered action list. Resolution is a first-match scan, so order is part of the contract.
#[derive(Clone, Debug)]
pub struct ActionRegistry {
    actions: Vec<Action>,
}

impl ActionRegistry {
    /// Builds a registry where every trigger string can reach exactly one action.
    pub fn new(actions: Vec<Action>) -> Result<Self, RegistryError> {
        let mut exact_owner = BTreeMap::<&str, &str>::new();
        let mut prefixes = Vec::<(&str, &str)>::new();

        for action in &actions {
            match &action.mode {
                MatchMode::Exact(triggers) => {
                    if triggers.is_empty() || triggers.iter().any(String::is_empty) {
                        return Err(RegistryError::EmptyTrigger { action: action.name.clone() });
                    }
                    for trigger in triggers {
                        if let Some((owner, prefix)) =
                            prefixes.iter().find(|(_, prefix)| trigger.starts_with(prefix))
                        {
                            return Err(RegistryError::ShadowedTrigger {
                                trigger: trigger.clone(),
                                first: (*owner).to_owned(),
                                prefix: (*prefix).to_owned(),
                                second: action.name.clone(),
                            });
                        }
                        if let Some(first) = exact_owner.insert(trigger.as_str(), action.name.as_str()) {
                            return Err(RegistryError::DuplicateTrigger {
                                trigger: trigger.clone(),
                                first: first.to_owned(),
                                second: action.name.clone(),
                            });
                        }
                    }
                }
                MatchMode::Prefix(prefix) => {
                    if prefix.is_empty() {
                        return Err(RegistryError::EmptyTrigger { action: action.name.clone() });
                    }
                    if let Some((owner, existing)) = prefixes.iter().find(|(_, existing)| {
                        existing.starts_with(prefix.as_str()) || prefix.starts_with(existing)
                    }) {
                        return Err(RegistryError::OverlappingPrefix {
                            first: (*owner).to_owned(),
                            first_prefix: (*existing).to_owned(),
                            second: action.name.clone(),
                            second_prefix: prefix.clone(),
                        });
                    }
                    prefixes.push((action.name.as_str(), prefix.as_str()));
                }
            }
        }

        Ok(Self { actions })
    }

    /// Skips validation; ambiguous registrations resolve to the earliest action.
    pub fn new_unchecked(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn help_listing(&self) -> Vec<String> {
        help_listing(&self.actions)
    }
}

pub fn help_listing(actions: &[Action]) -> Vec<String> {
    actions.iter().map(Action::listing).collect()
}

#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<ActionRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry: Arc::new(registry) }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn resolve(&self, command: &ParsedCommand) -> Result<&Action, CommandError> {
        self.registry
            .actions
            .iter()
            .find(|action| action.mode.matches(&command.trigger))
            .ok_or_else(|| CommandError::CommandNotFound { trigger: command.trigger.clone() })
    }

    pub async fn dispatch(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        let result = self.resolve_and_run(command, ctx).await;

        match &result {
            Ok(_) => debug!(
                event_name = "command.dispatch.completed",
                correlation_id = %ctx.correlation_id,
                trigger = %command.trigger,
                "command handled"
            ),
            Err(error) if error.severity() == ErrorSeverity::Degraded => warn!(
                event_name = "command.dispatch.failed",
                correlation_id = %ctx.correlation_id,
                trigger = %command.trigger,
                error = %error,
                "command failed on an upstream dependency"
            ),
            Err(error) => info!(
                event_name = "command.dispatch.rejected",
                correlation_id = %ctx.correlation_id,
                trigger = %command.trigger,
                error = %error,
                "command rejected"
            ),
        }

        result
    }

    async fn resolve_and_run(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        let action = self.resolve(command)?;
        action.validate_flags(command)?;

        debug!(
            event_name = "command.dispatch.resolved",
            correlation_id = %ctx.correlation_id,
            trigger = %command.trigger,
            action = %action.name,
            "command resolved"
        );

        action.handler.handle(command, ctx).await
    }
}
