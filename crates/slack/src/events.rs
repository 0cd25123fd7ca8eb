use std::sync::Arc;

use esibot_core::CommandError;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    blocks::{error_reply, help_reply, Reply},
    commands::{parse_message_text, CommandContext, CommandDispatcher, InboundText},
    sink::{MessageSink, SinkError},
};

/// Words that earn a message the `rip` reaction.
pub const LEGACY_TERMS: [&str; 2] = ["xml", "crest"];
pub const LEGACY_REACTION: &str = "rip";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(MessageEvent),
    Unsupported { event_type: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(Reply),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("reply delivery failed: {0}")]
    Delivery(#[from] SinkError),
}

/// Entry point for inbound events: turns channel messages into commands and posts whatever
/// they produce. Every other event kind is ignored.
pub struct MessageHandler {
    prefixes: Vec<String>,
    commands: CommandDispatcher,
    sink: Arc<dyn MessageSink>,
}

impl MessageHandler {
    pub fn new(
        prefixes: Vec<String>,
        commands: CommandDispatcher,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self { prefixes, commands, sink }
    }

    pub async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.bot_id.is_some() || event.subtype.is_some() {
            return Ok(HandlerResult::Ignored);
        }

        let reacted = self.react_to_legacy_terms(event, ctx).await;
        let inbound = parse_message_text(&event.text, &self.prefixes);
        let Some(reply) = self.reply_for(inbound, event, ctx).await else {
            return Ok(if reacted { HandlerResult::Processed } else { HandlerResult::Ignored });
        };

        debug!(
            event_name = "egress.slack.reply_ready",
            correlation_id = %ctx.correlation_id,
            channel_id = %event.channel_id,
            attachments = reply.attachments.len(),
            "posting reply"
        );
        self.sink.post(&event.channel_id, &reply).await?;
        info!(
            event_name = "egress.slack.reply_posted",
            correlation_id = %ctx.correlation_id,
            channel_id = %event.channel_id,
            "reply posted"
        );

        Ok(HandlerResult::Responded(reply))
    }

    async fn react_to_legacy_terms(&self, event: &MessageEvent, ctx: &EventContext) -> bool {
        if !LEGACY_TERMS.iter().any(|term| event.text.contains(term)) {
            return false;
        }

        if let Err(error) =
            self.sink.add_reaction(&event.channel_id, &event.ts, LEGACY_REACTION).await
        {
            warn!(
                event_name = "egress.slack.reaction_failed",
                correlation_id = %ctx.correlation_id,
                channel_id = %event.channel_id,
                error = %error,
                "failed to react to message with legacy term"
            );
        }
        true
    }

    async fn reply_for(
        &self,
        inbound: InboundText,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Option<Reply> {
        let command = match inbound {
            InboundText::NotAddressed => return None,
            InboundText::HelpRequested => {
                return Some(help_reply(&self.commands.registry().help_listing(), true));
            }
            InboundText::Command(command) => command,
        };

        let command_ctx = CommandContext {
            channel_id: event.channel_id.clone(),
            user_id: event.user_id.clone(),
            correlation_id: ctx.correlation_id.clone(),
        };

        let reply = match self.commands.dispatch(&command, &command_ctx).await {
            Ok(reply) => reply,
            Err(CommandError::CommandNotFound { .. }) => {
                help_reply(&self.commands.registry().help_listing(), false)
            }
            Err(error) => error_reply(&error, &ctx.correlation_id),
        };
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use esibot_core::{
        EnrichmentFanout, FanoutSettings, InMemoryUpstream, PathValidator, RouteSnapshot,
        RouteStatus, RouteTable, StatusCache, StatusTier,
    };

    use super::{
        EventContext, EventHandlerError, HandlerResult, MessageEvent, MessageHandler,
        SlackEnvelope, SlackEvent,
    };
    use crate::{
        actions::{default_registry, BotServices, BotSettings},
        commands::CommandDispatcher,
        sink::{MessageSink, RecordingSink, SinkError},
    };

    fn commands() -> CommandDispatcher {
        let upstream = Arc::new(InMemoryUpstream::new());
        let cache = StatusCache::new(upstream.clone(), Duration::from_secs(1));
        let entries = (0..10)
            .map(|index| {
                let tier = match index {
                    0..=2 => StatusTier::Red,
                    3..=4 => StatusTier::Yellow,
                    _ => StatusTier::Green,
                };
                RouteStatus::new("get", &format!("/v1/route/{index}/"), tier)
            })
            .collect();
        cache.insert(RouteSnapshot::new("latest", Some("\"e1\"".to_owned()), entries));

        let services = BotServices {
            status_cache: Arc::new(cache),
            validator: PathValidator::new(Arc::new(RouteTable::new())),
            fanout: EnrichmentFanout::new(upstream.clone(), FanoutSettings::default()),
            tranquility: upstream.clone(),
            serenity: upstream.clone(),
            github: upstream,
            settings: BotSettings {
                status_channel: "C0STATUS".to_owned(),
                ..BotSettings::default()
            },
        };
        CommandDispatcher::new(default_registry(&services).expect("valid registry"))
    }

    fn prefixes() -> Vec<String> {
        vec!["!esi".to_owned()]
    }

    fn message(text: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: "Ev01".to_owned(),
            event: SlackEvent::Message(MessageEvent {
                channel_id: "C1".to_owned(),
                user_id: "U1".to_owned(),
                text: text.to_owned(),
                ts: "1730000000.1000".to_owned(),
                bot_id: None,
                subtype: None,
            }),
        }
    }

    fn setup() -> (MessageHandler, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let handler = MessageHandler::new(prefixes(), commands(), sink.clone());
        (handler, sink)
    }

    #[tokio::test]
    async fn status_command_posts_degraded_route_summary() {
        let (handler, sink) = setup();

        let result = handler
            .handle(&message("!esi status --version=latest"), &EventContext::default())
            .await
            .expect("handle");

        assert!(matches!(result, HandlerResult::Responded(_)));
        let posted = sink.posts_to("C1");
        assert_eq!(posted.len(), 1);
        let fallbacks = posted[0]
            .attachments
            .iter()
            .filter_map(|attachment| attachment.fallback.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            fallbacks,
            vec![
                "3 Red (out of 10, 30.000%)".to_owned(),
                "2 Yellow (out of 10, 20.000%)".to_owned()
            ]
        );
        assert!(posted[0].text.contains("<#C0STATUS>"));
    }

    #[tokio::test]
    async fn unknown_command_replies_with_help() {
        let (handler, sink) = setup();

        handler
            .handle(&message("!esi wat"), &EventContext::default())
            .await
            .expect("handle");

        let posted = sink.posts_to("C1");
        assert!(posted[0].text.starts_with("Hmmmm...that is a not a recognized command"));
    }

    #[tokio::test]
    async fn bare_prefix_replies_with_help() {
        let (handler, sink) = setup();

        handler.handle(&message("!esi"), &EventContext::default()).await.expect("handle");

        assert!(sink.posts_to("C1")[0].text.starts_with("The following commands are enabled"));
    }

    #[tokio::test]
    async fn command_errors_become_user_facing_replies() {
        let (handler, sink) = setup();
        let ctx = EventContext { correlation_id: "req-9".to_owned() };

        handler
            .handle(&message("!esi status --version=beta"), &ctx)
            .await
            .expect("handle");

        let posted = sink.posts_to("C1");
        assert!(posted[0].text.contains("`beta` is not a valid value for `--version`"));
        assert_eq!(posted[0].attachments[0].footer.as_deref(), Some("Correlation ID: req-9"));
    }

    #[tokio::test]
    async fn legacy_terms_get_a_reaction_even_when_not_addressed() {
        let (handler, sink) = setup();

        let result = handler
            .handle(&message("remember crest?"), &EventContext::default())
            .await
            .expect("handle");

        assert_eq!(result, HandlerResult::Processed);
        assert!(sink.posts().is_empty());
        let reactions = sink.reactions();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].reaction, "rip");
        assert_eq!(reactions[0].timestamp, "1730000000.1000");
    }

    #[tokio::test]
    async fn bot_messages_and_subtypes_are_ignored() {
        let (handler, sink) = setup();
        let mut envelope = message("!esi help");
        if let SlackEvent::Message(event) = &mut envelope.event {
            event.bot_id = Some("B1".to_owned());
        }

        let result =
            handler.handle(&envelope, &EventContext::default()).await.expect("handle");

        assert_eq!(result, HandlerResult::Ignored);
        assert!(sink.posts().is_empty());
    }

    #[tokio::test]
    async fn unsupported_events_are_ignored() {
        let (handler, _sink) = setup();
        let envelope = SlackEnvelope {
            envelope_id: "Ev02".to_owned(),
            event: SlackEvent::Unsupported { event_type: "reaction_added".to_owned() },
        };

        let result =
            handler.handle(&envelope, &EventContext::default()).await.expect("handle");
        assert_eq!(result, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn delivery_failures_surface_to_the_caller() {
        let sink: Arc<dyn MessageSink> = Arc::new(RecordingSink::rejecting());
        let handler = MessageHandler::new(prefixes(), commands(), sink);

        let error = handler
            .handle(&message("!esi help"), &EventContext::default())
            .await
            .expect_err("rejected post should fail");

        assert_eq!(
            error,
            EventHandlerError::Delivery(SinkError::Rejected("channel_not_found".to_owned()))
        );
    }
}
