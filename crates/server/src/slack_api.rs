use async_trait::async_trait;
use esibot_slack::{
    blocks::Reply,
    sink::{MessageSink, SinkError},
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Slack Web API `MessageSink` authenticated with the bot token.
#[derive(Clone)]
pub struct SlackWebApi {
    client: Client,
    base_url: String,
    bot_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackWebApi {
    pub fn new(client: Client, base_url: &str, bot_token: SecretString) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_owned(), bot_token }
    }

    async fn call(&self, method: &str, payload: &Value) -> Result<(), SinkError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|error| SinkError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Transport(format!("{method} returned http {status}")));
        }
        let body = response
            .json::<ApiResponse>()
            .await
            .map_err(|error| SinkError::Transport(error.to_string()))?;

        debug!(event_name = "egress.slack.api_call", method, ok = body.ok, "slack api call");
        check(method, body)
    }
}

fn check(method: &str, response: ApiResponse) -> Result<(), SinkError> {
    if response.ok {
        return Ok(());
    }
    Err(SinkError::Rejected(format!(
        "{method}: {}",
        response.error.unwrap_or_else(|| "unknown_error".to_owned())
    )))
}

pub fn message_payload(channel: &str, reply: &Reply) -> Value {
    let mut payload = serde_json::to_value(reply).unwrap_or_else(|_| json!({ "text": reply.text }));
    if let Value::Object(map) = &mut payload {
        map.insert("channel".to_owned(), Value::String(channel.to_owned()));
    }
    payload
}

pub fn reaction_payload(channel: &str, timestamp: &str, reaction: &str) -> Value {
    json!({ "channel": channel, "timestamp": timestamp, "name": reaction })
}

#[async_trait]
impl MessageSink for SlackWebApi {
    async fn post(&self, channel: &str, reply: &Reply) -> Result<(), SinkError> {
        self.call("chat.postMessage", &message_payload(channel, reply)).await
    }

    async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        reaction: &str,
    ) -> Result<(), SinkError> {
        self.call("reactions.add", &reaction_payload(channel, timestamp, reaction)).await
    }
}

#[cfg(test)]
mod tests {
    use esibot_slack::{
        blocks::{AttachmentColor, ReplyBuilder},
        sink::SinkError,
    };
    use serde_json::json;

    use super::{check, message_payload, reaction_payload, ApiResponse};

    #[test]
    fn message_payload_carries_channel_and_attachments() {
        let reply = ReplyBuilder::new("hello")
            .attachment(|attachment| {
                attachment.color(AttachmentColor::Danger).title("Tranquility status");
            })
            .build();

        let payload = message_payload("C1", &reply);

        assert_eq!(payload["channel"], "C1");
        assert_eq!(payload["text"], "hello");
        assert_eq!(payload["attachments"][0]["color"], "danger");
        assert_eq!(payload["attachments"][0]["title"], "Tranquility status");
    }

    #[test]
    fn reaction_payload_names_the_emoji() {
        assert_eq!(
            reaction_payload("C1", "1.2", "rip"),
            json!({ "channel": "C1", "timestamp": "1.2", "name": "rip" })
        );
    }

    #[test]
    fn not_ok_responses_are_rejections() {
        assert_eq!(check("chat.postMessage", ApiResponse { ok: true, error: None }), Ok(()));
        assert_eq!(
            check(
                "chat.postMessage",
                ApiResponse { ok: false, error: Some("channel_not_found".to_owned()) }
            ),
            Err(SinkError::Rejected("chat.postMessage: channel_not_found".to_owned()))
        );
    }
}
