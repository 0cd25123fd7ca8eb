use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use esibot_slack::events::{EventContext, MessageEvent, MessageHandler, SlackEnvelope, SlackEvent};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct EventsState {
    handler: Arc<MessageHandler>,
}

impl EventsState {
    pub fn new(handler: Arc<MessageHandler>) -> Self {
        Self { handler }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Callback {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event_id: String,
        event: RawEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl RawEvent {
    pub fn into_envelope(self, event_id: String) -> SlackEnvelope {
        let event = if self.event_type == "message" {
            SlackEvent::Message(MessageEvent {
                channel_id: self.channel,
                user_id: self.user,
                text: self.text,
                ts: self.ts,
                bot_id: self.bot_id,
                subtype: self.subtype,
            })
        } else {
            SlackEvent::Unsupported { event_type: self.event_type }
        };
        SlackEnvelope { envelope_id: event_id, event }
    }
}

pub fn router(state: EventsState) -> Router {
    Router::new().route("/slack/events", post(slack_events)).with_state(state)
}

/// Acknowledges immediately; dispatch continues on a spawned task.
pub async fn slack_events(
    State(state): State<EventsState>,
    Json(callback): Json<Callback>,
) -> Response {
    match callback {
        Callback::UrlVerification { challenge } => {
            debug!(event_name = "ingress.slack.url_verification", "answering url verification");
            Json(json!({ "challenge": challenge })).into_response()
        }
        Callback::EventCallback { event_id, event } => {
            let envelope = event.into_envelope(event_id);
            let ctx = EventContext { correlation_id: Uuid::new_v4().to_string() };
            debug!(
                event_name = "ingress.slack.event_received",
                correlation_id = %ctx.correlation_id,
                envelope_id = %envelope.envelope_id,
                "slack event received"
            );

            let handler = Arc::clone(&state.handler);
            tokio::spawn(async move {
                if let Err(error) = handler.handle(&envelope, &ctx).await {
                    warn!(
                        event_name = "ingress.slack.handle_failed",
                        correlation_id = %ctx.correlation_id,
                        envelope_id = %envelope.envelope_id,
                        error = %error,
                        "slack event handling failed; continuing"
                    );
                }
            });
            StatusCode::OK.into_response()
        }
        Callback::Other => StatusCode::OK.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use esibot_slack::{
        actions::GreetingAction,
        commands::{Action, ActionRegistry, CommandDispatcher},
        events::{MessageHandler, SlackEvent},
        sink::RecordingSink,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, EventsState, RawEvent};

    fn setup() -> (axum::Router, Arc<RecordingSink>) {
        let registry =
            ActionRegistry::new(vec![Action::exact("greetings", ["hi"], Arc::new(GreetingAction))])
                .expect("registry");
        let sink = Arc::new(RecordingSink::new());
        let handler = MessageHandler::new(
            vec!["!esi".to_owned()],
            CommandDispatcher::new(registry),
            sink.clone(),
        );
        (router(EventsState::new(Arc::new(handler))), sink)
    }

    fn request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let (app, _sink) = setup();

        let response = app
            .oneshot(request(json!({ "type": "url_verification", "challenge": "abc123" })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload, json!({ "challenge": "abc123" }));
    }

    #[tokio::test]
    async fn message_events_are_acknowledged_then_handled() {
        let (app, sink) = setup();

        let response = app
            .oneshot(request(json!({
                "type": "event_callback",
                "event_id": "Ev01",
                "event": {
                    "type": "message",
                    "channel": "C1",
                    "user": "U1",
                    "text": "!esi hi",
                    "ts": "1730000000.1000"
                }
            })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        for _ in 0..50 {
            if !sink.posts().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.posts_to("C1").len(), 1);
    }

    #[tokio::test]
    async fn unknown_callback_types_are_acknowledged() {
        let (app, sink) = setup();

        let response = app
            .oneshot(request(json!({ "type": "app_rate_limited", "minute_rate_limited": 1 })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.posts().is_empty());
    }

    #[test]
    fn non_message_events_become_unsupported() {
        let envelope = RawEvent { event_type: "reaction_added".to_owned(), ..RawEvent::default() }
            .into_envelope("Ev02".to_owned());

        assert_eq!(
            envelope.event,
            SlackEvent::Unsupported { event_type: "reaction_added".to_owned() }
        );
    }
}
