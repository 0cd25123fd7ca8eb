use chrono::{DateTime, Utc};
use esibot_core::{CommandError, RouteDelta, RouteSnapshot, StatusTier};
use serde::Serialize;

pub const ROUTE_LIST_LIMIT: usize = 50;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub unfurl_links: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentColor {
    Good,
    Warning,
    Danger,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<AttachmentColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<AttachmentAction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttachmentAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
}

impl AttachmentAction {
    pub fn link_button(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self { kind: "button".to_owned(), text: text.into(), url: url.into(), style: None }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }
}

pub struct ReplyBuilder {
    text: String,
    attachments: Vec<Attachment>,
    unfurl_links: bool,
}

impl ReplyBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), attachments: Vec::new(), unfurl_links: false }
    }

    pub fn unfurl_links(mut self, unfurl_links: bool) -> Self {
        self.unfurl_links = unfurl_links;
        self
    }

    pub fn attachment<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut AttachmentBuilder),
    {
        let mut builder = AttachmentBuilder::default();
        build(&mut builder);
        self.attachments.push(builder.build());
        self
    }

    pub fn push(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn build(self) -> Reply {
        Reply { text: self.text, attachments: self.attachments, unfurl_links: self.unfurl_links }
    }
}

#[derive(Default)]
pub struct AttachmentBuilder {
    attachment: Attachment,
}

impl AttachmentBuilder {
    pub fn color(&mut self, color: AttachmentColor) -> &mut Self {
        self.attachment.color = Some(color);
        self
    }

    pub fn pretext(&mut self, pretext: impl Into<String>) -> &mut Self {
        self.attachment.pretext = Some(pretext.into());
        self
    }

    pub fn title(&mut self, title: impl Into<String>) -> &mut Self {
        self.attachment.title = Some(title.into());
        self
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.attachment.text = Some(text.into());
        self
    }

    pub fn fallback(&mut self, fallback: impl Into<String>) -> &mut Self {
        self.attachment.fallback = Some(fallback.into());
        self
    }

    pub fn footer(&mut self, footer: impl Into<String>) -> &mut Self {
        self.attachment.footer = Some(footer.into());
        self
    }

    pub fn field(
        &mut self,
        title: impl Into<String>,
        value: impl Into<String>,
        short: bool,
    ) -> &mut Self {
        self.attachment.fields.push(AttachmentField {
            title: title.into(),
            value: value.into(),
            short,
        });
        self
    }

    pub fn button(&mut self, action: AttachmentAction) -> &mut Self {
        self.attachment.actions.push(action);
        self
    }

    fn build(self) -> Attachment {
        self.attachment
    }
}

pub fn help_reply(listing: &[String], recognized: bool) -> Reply {
    let lead = if recognized {
        "The following commands are enabled: "
    } else {
        "Hmmmm...that is a not a recognized command. Here is a list of commands that are enabled: "
    };
    Reply::text(format!("{lead}\n`{}`", listing.join("` `")))
}

struct Category {
    tier: StatusTier,
    emoji: &'static str,
    color: AttachmentColor,
}

const CATEGORIES: [Category; 2] = [
    Category { tier: StatusTier::Red, emoji: ":fire:", color: AttachmentColor::Danger },
    Category { tier: StatusTier::Yellow, emoji: ":fire_engine:", color: AttachmentColor::Warning },
];

/// Route health summary for one snapshot.
///
/// `pointer_channel` adds a nudge towards the channel that carries the continuous feed; pass it
/// when replying anywhere else.
pub fn status_reply(snapshot: &RouteSnapshot, pointer_channel: Option<&str>) -> Reply {
    let total = snapshot.entries.len();
    let mut attachments = Vec::new();

    for category in &CATEGORIES {
        let routes = snapshot.with_tier(category.tier);
        if routes.is_empty() {
            continue;
        }

        let summary = format!(
            "{} {} (out of {total}, {:.3}%)",
            routes.len(),
            category.tier.title(),
            percentage(routes.len(), total)
        );
        let listing = route_listing(
            routes.iter().map(|route| format!("{} {}", route.method.to_uppercase(), route.path)),
        );

        attachments.push(Attachment {
            color: Some(category.color),
            text: Some(format!("{emoji} {summary} {emoji} {listing}", emoji = category.emoji)),
            fallback: Some(summary),
            ..Attachment::default()
        });
    }

    if attachments.is_empty() {
        attachments.push(Attachment {
            color: Some(AttachmentColor::Good),
            text: Some(":the_horns:".to_owned()),
            fallback: Some(format!("All {total} routes are green")),
            ..Attachment::default()
        });
    }

    if let Some(first) = attachments.first_mut() {
        first.pretext = Some(format!(
            "ESI `{}` route status as of {}",
            snapshot.version,
            slack_date(snapshot.fetched_at)
        ));
    }
    if let Some(last) = attachments.last_mut() {
        last.footer = Some(format!("Etag: {}", snapshot.etag.as_deref().unwrap_or("none")));
    }

    let text = pointer_channel
        .map(|channel| {
            format!("Psst.....Checkout <#{channel}> for a continuous feed of statuses from me...")
        })
        .unwrap_or_default();

    Reply { text, attachments, unfurl_links: false }
}

pub fn schema_update_reply(delta: &RouteDelta, detected_at: DateTime<Utc>) -> Reply {
    ReplyBuilder::new(format!("*ESI Schema Update Detected*\n\n{}", slack_date(detected_at)))
        .attachment(|attachment| {
            attachment
                .color(AttachmentColor::Warning)
                .text(format!("```{}```", delta.lines().join("\n")))
                .fallback(format!(
                    "{} routes added, {} routes removed",
                    delta.added.len(),
                    delta.removed.len()
                ));
        })
        .build()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueKind {
    Bug,
    Feature,
    Inconsistency,
}

pub fn issue_reply(issues_url: &str, kind: Option<IssueKind>) -> Reply {
    let mut builder = ReplyBuilder::new("").attachment(|attachment| {
        attachment.title("Opening a new issue").text(format!(
            "Before opening a new issues, please use the <{issues_url}/issues|search function> to see if a similar issue exists, or has already been created."
        ));
    });

    let kinds = match kind {
        Some(kind) => vec![kind],
        None => vec![IssueKind::Bug, IssueKind::Feature, IssueKind::Inconsistency],
    };
    for kind in kinds {
        builder = builder.push(issue_attachment(issues_url, kind));
    }

    builder.build()
}

fn issue_attachment(issues_url: &str, kind: IssueKind) -> Attachment {
    let mut builder = AttachmentBuilder::default();
    match kind {
        IssueKind::Bug => {
            builder
                .title("Report a New Bug")
                .text("• unexpected 500 responses\n• incorrect information in the swagger spec\n• otherwise invalid or unexpected responses")
                .color(AttachmentColor::Danger)
                .button(
                    AttachmentAction::link_button(
                        "Report A Bug",
                        format!("{issues_url}/issues/new?template=bug.md"),
                    )
                    .style(ButtonStyle::Danger),
                );
        }
        IssueKind::Feature => {
            builder
                .title("Request A New Feature")
                .text("• adding an attribute to an existing route\n• exposing other readily available client data\n• meta requests, adding some global parameter to the specs")
                .color(AttachmentColor::Good)
                .button(
                    AttachmentAction::link_button(
                        "Request A Feature",
                        format!("{issues_url}/issues/new?template=feature_request.md"),
                    )
                    .style(ButtonStyle::Primary),
                );
        }
        IssueKind::Inconsistency => {
            builder
                .title("Report An Inconsistency")
                .text("• two endpoints returning slightly different names for the same attribute\n• attribute values are returned with different formats for different routes")
                .color(AttachmentColor::Warning)
                .button(
                    AttachmentAction::link_button(
                        "Report An Inconsistency",
                        format!("{issues_url}/issues/new?template=inconsistency.md"),
                    )
                    .style(ButtonStyle::Primary),
                );
        }
    }
    builder.build()
}

/// User-facing rendering of a failed command.
pub fn error_reply(error: &CommandError, correlation_id: &str) -> Reply {
    match error {
        CommandError::PathInvalid { canonical } => ReplyBuilder::new("")
            .attachment(|attachment| {
                attachment
                    .pretext(error.user_message())
                    .text(canonical.clone())
                    .fallback(format!("Invalid path {canonical}"));
            })
            .build(),
        _ => ReplyBuilder::new(format!(":warning: {}", error.user_message()))
            .attachment(|attachment| {
                attachment.footer(format!("Correlation ID: {correlation_id}"));
            })
            .build(),
    }
}

/// Slack `<!date>` token that renders in the reader's timezone.
pub fn slack_date(at: DateTime<Utc>) -> String {
    format!(
        "<!date^{}^{{date_num}} {{time_secs}}|{}>",
        at.timestamp(),
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64) * 100.0
}

fn route_listing(routes: impl ExactSizeIterator<Item = String>) -> String {
    let total = routes.len();
    let mut lines = routes.take(ROUTE_LIST_LIMIT).collect::<Vec<_>>();
    if total > ROUTE_LIST_LIMIT {
        lines.push(format!("… and {} more", total - ROUTE_LIST_LIMIT));
    }
    format!("```{}```", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use esibot_core::{CommandError, RouteDelta, RouteSnapshot, RouteStatus, StatusTier};

    use super::{
        error_reply, group_thousands, help_reply, issue_reply, schema_update_reply, slack_date,
        status_reply, AttachmentColor, ButtonStyle, IssueKind, ReplyBuilder,
    };

    fn snapshot(red: usize, yellow: usize, total: usize) -> RouteSnapshot {
        let entries = (0..total)
            .map(|index| {
                let tier = if index < red {
                    StatusTier::Red
                } else if index < red + yellow {
                    StatusTier::Yellow
                } else {
                    StatusTier::Green
                };
                RouteStatus::new("get", &format!("/route/{index}/"), tier)
            })
            .collect();
        RouteSnapshot::new("latest", Some("\"etag-1\"".to_owned()), entries)
    }

    #[test]
    fn reply_builder_collects_attachments_in_order() {
        let reply = ReplyBuilder::new("hello")
            .unfurl_links(true)
            .attachment(|attachment| {
                attachment.title("first").color(AttachmentColor::Good);
            })
            .attachment(|attachment| {
                attachment.title("second").field("Players", "1,234", true);
            })
            .build();

        assert_eq!(reply.text, "hello");
        assert!(reply.unfurl_links);
        assert_eq!(reply.attachments.len(), 2);
        assert_eq!(reply.attachments[0].title.as_deref(), Some("first"));
        assert_eq!(reply.attachments[1].fields[0].value, "1,234");
    }

    #[test]
    fn status_reply_reports_red_and_yellow_shares() {
        let reply = status_reply(&snapshot(3, 2, 10), None);

        assert_eq!(reply.attachments.len(), 2);
        assert_eq!(reply.attachments[0].fallback.as_deref(), Some("3 Red (out of 10, 30.000%)"));
        assert_eq!(reply.attachments[0].color, Some(AttachmentColor::Danger));
        assert_eq!(
            reply.attachments[1].fallback.as_deref(),
            Some("2 Yellow (out of 10, 20.000%)")
        );
        assert_eq!(reply.attachments[1].color, Some(AttachmentColor::Warning));

        let red_text = reply.attachments[0].text.as_deref().unwrap_or_default();
        assert!(red_text.starts_with(":fire: 3 Red"));
        assert!(red_text.contains("GET /route/0/"));
        assert!(!red_text.contains("/route/3/"));

        assert!(reply.attachments[0].pretext.as_deref().unwrap_or_default().contains("<!date^"));
        assert_eq!(reply.attachments[1].footer.as_deref(), Some("Etag: \"etag-1\""));
        assert!(reply.text.is_empty());
    }

    #[test]
    fn status_reply_with_nothing_degraded_shows_the_horns() {
        let reply = status_reply(&snapshot(0, 0, 4), Some("C0STATUS"));

        assert_eq!(reply.attachments.len(), 1);
        assert_eq!(reply.attachments[0].text.as_deref(), Some(":the_horns:"));
        assert!(reply.attachments[0].footer.is_some());
        assert!(reply.text.contains("<#C0STATUS>"));
    }

    #[test]
    fn status_reply_caps_route_listing() {
        let reply = status_reply(&snapshot(60, 0, 60), None);
        let text = reply.attachments[0].text.clone().unwrap_or_default();

        assert!(text.contains("GET /route/49/"));
        assert!(!text.contains("GET /route/50/"));
        assert!(text.contains("… and 10 more"));
    }

    #[test]
    fn schema_update_lists_added_then_removed() {
        let delta = RouteDelta {
            added: vec!["/v1/new/".to_owned()],
            removed: vec!["/v1/old/".to_owned()],
        };
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default();
        let reply = schema_update_reply(&delta, at);

        assert!(reply.text.starts_with("*ESI Schema Update Detected*"));
        assert_eq!(
            reply.attachments[0].text.as_deref(),
            Some("```+ /v1/new/\n- /v1/old/```")
        );
    }

    #[test]
    fn issue_reply_for_bug_has_danger_button() {
        let reply = issue_reply("https://github.com/esi/esi-issues", Some(IssueKind::Bug));

        assert_eq!(reply.attachments.len(), 2);
        let button = &reply.attachments[1].actions[0];
        assert_eq!(button.style, Some(ButtonStyle::Danger));
        assert_eq!(button.url, "https://github.com/esi/esi-issues/issues/new?template=bug.md");
    }

    #[test]
    fn issue_reply_without_kind_lists_every_template() {
        let reply = issue_reply("https://github.com/esi/esi-issues", None);
        assert_eq!(reply.attachments.len(), 4);
    }

    #[test]
    fn invalid_path_error_shows_canonical_path() {
        let error = CommandError::PathInvalid { canonical: "/latest/bogus/path".to_owned() };
        let reply = error_reply(&error, "req-1");

        assert_eq!(reply.attachments[0].text.as_deref(), Some("/latest/bogus/path"));
        assert!(reply.attachments[0]
            .pretext
            .as_deref()
            .unwrap_or_default()
            .starts_with("Provided Path is not valid"));
    }

    #[test]
    fn other_errors_carry_correlation_id() {
        let error = CommandError::UpstreamUnavailable { status: Some(502), detail: "boom".to_owned() };
        let reply = error_reply(&error, "req-42");

        assert!(reply.text.contains("ESI responded with status 502"));
        assert_eq!(reply.attachments[0].footer.as_deref(), Some("Correlation ID: req-42"));
    }

    #[test]
    fn help_reply_marks_unrecognized_commands() {
        let listing = vec!["help".to_owned(), "status".to_owned()];

        assert_eq!(
            help_reply(&listing, true).text,
            "The following commands are enabled: \n`help` `status`"
        );
        assert!(help_reply(&listing, false)
            .text
            .starts_with("Hmmmm...that is a not a recognized command"));
    }

    #[test]
    fn formats_thousands_and_dates() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(21_345), "21,345");
        assert_eq!(group_thousands(-1_234_567), "-1,234,567");

        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default();
        assert_eq!(
            slack_date(at),
            format!("<!date^{}^{{date_num}} {{time_secs}}|2026-03-01 12:00:00>", at.timestamp())
        );
    }
}
