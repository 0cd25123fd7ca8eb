use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use esibot_core::{
    fetch_with_timeout, render_payload, truncate_payload, CommandError, EnrichmentFanout,
    FetchOptions, PathValidator, UpstreamClient,
};
use tokio::time::Instant;
use tracing::info;

use crate::{
    blocks::{Attachment, AttachmentColor, Reply, ReplyBuilder},
    commands::{ActionHandler, CommandContext, ParsedCommand},
};

/// Bytes taken by the code fence wrapped around payloads.
const FENCE_OVERHEAD: usize = 6;

/// `/<path>`: validates the path against the route table, then relays the upstream response.
pub struct ProxyAction {
    validator: PathValidator,
    client: Arc<dyn UpstreamClient>,
    timeout: Duration,
    max_payload_bytes: usize,
}

impl ProxyAction {
    pub fn new(
        validator: PathValidator,
        client: Arc<dyn UpstreamClient>,
        timeout: Duration,
        max_payload_bytes: usize,
    ) -> Self {
        Self { validator, client, timeout, max_payload_bytes }
    }
}

#[async_trait]
impl ActionHandler for ProxyAction {
    async fn handle(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        let validated = self.validator.validate(&command.trigger);
        if !validated.matched {
            info!(
                event_name = "command.proxy.path_rejected",
                correlation_id = %ctx.correlation_id,
                canonical = %validated.canonical,
                "path did not match any known route"
            );
            return Err(CommandError::PathInvalid { canonical: validated.canonical });
        }

        let started = Instant::now();
        let response = fetch_with_timeout(
            self.client.as_ref(),
            &validated.canonical,
            FetchOptions::default(),
            self.timeout,
        )
        .await?;
        let elapsed = started.elapsed();

        let ceiling = self.max_payload_bytes.saturating_sub(FENCE_OVERHEAD);
        let payload = match serde_json::from_slice::<serde_json::Value>(&response.body) {
            Ok(value) => render_payload(&value, ceiling),
            Err(_) => truncate_payload(response.body_text(), ceiling),
        };

        info!(
            event_name = "command.proxy.completed",
            correlation_id = %ctx.correlation_id,
            canonical = %validated.canonical,
            status = response.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "relayed upstream response"
        );

        Ok(ReplyBuilder::new(format!("{} ({}ms)", response.status, elapsed.as_millis()))
            .attachment(|attachment| {
                attachment
                    .title(validated.canonical.clone())
                    .text(format!("```{payload}```"))
                    .fallback(validated.canonical.clone());
            })
            .build())
    }
}

/// `types <id>...`: fetches and enriches up to `max_type_ids` types concurrently.
pub struct TypeLookupAction {
    fanout: EnrichmentFanout,
    max_type_ids: usize,
    max_payload_bytes: usize,
}

impl TypeLookupAction {
    pub fn new(fanout: EnrichmentFanout, max_type_ids: usize, max_payload_bytes: usize) -> Self {
        Self { fanout, max_type_ids, max_payload_bytes }
    }
}

#[async_trait]
impl ActionHandler for TypeLookupAction {
    async fn handle(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Reply, CommandError> {
        if command.args.is_empty() {
            return Err(CommandError::BadArguments(
                "You need to supply at least one type id to lookup".to_owned(),
            ));
        }
        if command.args.len() > self.max_type_ids {
            return Err(CommandError::BadArguments(format!(
                "Please supply a maximum of {} ids to look up",
                self.max_type_ids
            )));
        }

        let mut notes = Vec::new();
        let mut type_ids = Vec::new();
        for arg in &command.args {
            match arg.parse::<i64>() {
                Ok(type_id) => type_ids.push(type_id),
                Err(_) => notes.push(format!("{arg} is not a valid number, skipping")),
            }
        }

        let lookups = self.fanout.lookup_types(&type_ids).await;
        let ceiling =
            (self.max_payload_bytes / type_ids.len().max(1)).saturating_sub(FENCE_OVERHEAD);

        let mut builder = ReplyBuilder::new(notes.join("\n"));
        for lookup in lookups {
            let elapsed_ms = lookup.elapsed.as_millis();
            let attachment = match lookup.result {
                Ok(enriched) => {
                    info!(
                        event_name = "command.types.resolved",
                        correlation_id = %ctx.correlation_id,
                        type_id = lookup.type_id,
                        upstream_calls = enriched.upstream_calls,
                        unresolved = enriched.unresolved,
                        "type enriched"
                    );
                    Attachment {
                        color: Some(AttachmentColor::Good),
                        title: Some(format!("{} ({})", enriched.resource.name, lookup.type_id)),
                        text: Some(format!(
                            "```{}```",
                            render_payload(&enriched.resource, ceiling)
                        )),
                        fallback: Some(enriched.resource.name.clone()),
                        footer: Some(format!(
                            "{elapsed_ms}ms ({} calls to esi)",
                            enriched.upstream_calls
                        )),
                        ..Attachment::default()
                    }
                }
                Err(error) => {
                    let error = CommandError::from(error);
                    Attachment {
                        color: Some(AttachmentColor::Danger),
                        title: Some(format!("Type {}", lookup.type_id)),
                        text: Some(format!(
                            "Failed to look up type {}. {}",
                            lookup.type_id,
                            error.user_message()
                        )),
                        fallback: Some(format!("Failed to look up type {}", lookup.type_id)),
                        ..Attachment::default()
                    }
                }
            };
            builder = builder.push(attachment);
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use esibot_core::{
        CommandError, EnrichmentFanout, FanoutSettings, InMemoryUpstream, PathValidator,
        RouteTable, RouteTemplate, UpstreamResponse, TRUNCATION_MARKER,
    };

    use super::{ProxyAction, TypeLookupAction};
    use crate::{
        blocks::AttachmentColor,
        commands::{ActionHandler, CommandContext, ParsedCommand},
    };

    fn validator() -> PathValidator {
        let templates = ["/universe/types/{type_id}/", "/status/"]
            .iter()
            .filter_map(|path| RouteTemplate::parse(path))
            .collect();
        PathValidator::new(Arc::new(RouteTable::from_templates(templates)))
    }

    #[tokio::test]
    async fn proxy_rejects_unknown_paths_without_fetching() {
        let upstream = Arc::new(InMemoryUpstream::new());
        let action = ProxyAction::new(validator(), upstream.clone(), Duration::from_secs(1), 4_000);

        let error = action
            .handle(&ParsedCommand::new("/bogus/path"), &CommandContext::default())
            .await
            .expect_err("unknown path");

        assert_eq!(error, CommandError::PathInvalid { canonical: "/latest/bogus/path".to_owned() });
        assert!(upstream.requests().is_empty());
    }

    #[tokio::test]
    async fn proxy_relays_pretty_json_from_canonical_path() {
        let upstream = Arc::new(InMemoryUpstream::new().respond(
            "/dev/universe/types/587",
            UpstreamResponse::ok(r#"{"type_id":587,"name":"Rifter"}"#),
        ));
        let action = ProxyAction::new(validator(), upstream.clone(), Duration::from_secs(1), 4_000);

        let reply = action
            .handle(&ParsedCommand::new("/dev/universe/types/587/"), &CommandContext::default())
            .await
            .expect("proxied reply");

        assert!(reply.text.starts_with("200 ("));
        assert_eq!(reply.attachments[0].title.as_deref(), Some("/dev/universe/types/587"));
        assert!(reply.attachments[0]
            .text
            .as_deref()
            .unwrap_or_default()
            .contains("\"name\": \"Rifter\""));
        assert_eq!(upstream.request_count("/dev/universe/types/587"), 1);
    }

    #[tokio::test]
    async fn proxy_truncates_large_payloads() {
        let large = format!("[{}]", vec!["1234567890"; 500].join(","));
        let upstream = Arc::new(
            InMemoryUpstream::new().respond("/latest/status", UpstreamResponse::ok(large)),
        );
        let action = ProxyAction::new(validator(), upstream, Duration::from_secs(1), 512);

        let reply = action
            .handle(&ParsedCommand::new("/status"), &CommandContext::default())
            .await
            .expect("proxied reply");
        let text = reply.attachments[0].text.clone().unwrap_or_default();

        assert!(text.len() <= 512);
        assert!(text.ends_with(&format!("{TRUNCATION_MARKER}```")));
    }

    #[tokio::test]
    async fn proxy_surfaces_upstream_status_errors() {
        let upstream = Arc::new(InMemoryUpstream::new().respond(
            "/latest/status",
            UpstreamResponse { status: 502, body: b"bad gateway".to_vec(), etag: None },
        ));
        let action = ProxyAction::new(validator(), upstream, Duration::from_secs(1), 4_000);

        let error = action
            .handle(&ParsedCommand::new("/status"), &CommandContext::default())
            .await
            .expect_err("502 should surface");
        assert_eq!(
            error,
            CommandError::UpstreamUnavailable {
                status: Some(502),
                detail: "bad gateway".to_owned()
            }
        );
    }

    fn lookup_action(upstream: Arc<InMemoryUpstream>) -> TypeLookupAction {
        TypeLookupAction::new(EnrichmentFanout::new(upstream, FanoutSettings::default()), 3, 8_000)
    }

    #[tokio::test]
    async fn type_lookup_validates_argument_count() {
        let action = lookup_action(Arc::new(InMemoryUpstream::new()));
        let ctx = CommandContext::default();

        let none = action.handle(&ParsedCommand::new("types"), &ctx).await;
        assert!(matches!(none, Err(CommandError::BadArguments(_))));

        let too_many = action
            .handle(&ParsedCommand::new("types").arg("1").arg("2").arg("3").arg("4"), &ctx)
            .await;
        assert_eq!(
            too_many,
            Err(CommandError::BadArguments("Please supply a maximum of 3 ids to look up".to_owned()))
        );
    }

    #[tokio::test]
    async fn type_lookup_skips_non_numeric_ids_and_reports_failures() {
        let upstream = Arc::new(
            InMemoryUpstream::new()
                .respond(
                    "/latest/universe/types/587/",
                    UpstreamResponse::ok(
                        r#"{"type_id":587,"name":"Rifter","dogma_attributes":[{"attribute_id":9,"value":350.0}]}"#,
                    ),
                )
                .respond("/v1/dogma/attributes/9/", UpstreamResponse::ok(r#"{"name":"hp"}"#)),
        );
        let action = lookup_action(upstream);

        let reply = action
            .handle(
                &ParsedCommand::new("types").arg("587").arg("rifter").arg("404"),
                &CommandContext::default(),
            )
            .await
            .expect("lookup reply");

        assert_eq!(reply.text, "rifter is not a valid number, skipping");
        assert_eq!(reply.attachments.len(), 2);
        assert_eq!(reply.attachments[0].title.as_deref(), Some("Rifter (587)"));
        assert!(reply.attachments[0].text.as_deref().unwrap_or_default().contains("\"hp\""));
        assert!(reply.attachments[0]
            .footer
            .as_deref()
            .unwrap_or_default()
            .ends_with("(2 calls to esi)"));
        assert_eq!(reply.attachments[1].color, Some(AttachmentColor::Danger));
    }
}
