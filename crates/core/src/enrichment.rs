use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{sync::Semaphore, task::JoinSet, time::Instant};
use tracing::{debug, warn};

use crate::upstream::{fetch_with_timeout, FetchOptions, UpstreamClient, UpstreamError};

pub const UNRESOLVED_NAME: &str = "failed to acquire the name of this attribute";
pub const TRUNCATION_MARKER: &str = "\nand more ...";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DogmaAttribute {
    pub attribute_id: i64,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DogmaEffect {
    pub effect_id: i64,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// `/universe/types/{type_id}/` payload. Fields the bot does not touch are carried through
/// untouched in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeResource {
    pub type_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dogma_attributes: Vec<DogmaAttribute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dogma_effects: Vec<DogmaEffect>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TypeResource {
    pub fn reference_count(&self) -> usize {
        self.dogma_attributes.len() + self.dogma_effects.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReferenceKind {
    Attribute,
    Effect,
}

impl ReferenceKind {
    fn path(&self, id: i64) -> String {
        match self {
            Self::Attribute => format!("/v1/dogma/attributes/{id}/"),
            Self::Effect => format!("/v1/dogma/effects/{id}/"),
        }
    }
}

#[derive(Debug)]
struct ResolvedName {
    kind: ReferenceKind,
    index: usize,
    name: Option<String>,
}

#[derive(Deserialize)]
struct NamedResource {
    #[serde(default)]
    name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnrichedType {
    pub resource: TypeResource,
    /// Requests issued for this type, the primary fetch included.
    pub upstream_calls: usize,
    pub unresolved: usize,
}

#[derive(Debug)]
pub struct TypeLookup {
    pub type_id: i64,
    pub result: Result<EnrichedType, UpstreamError>,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FanoutSettings {
    pub primary_timeout: Duration,
    pub lookup_timeout: Duration,
    pub max_concurrent_lookups: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(30),
            lookup_timeout: Duration::from_secs(5),
            max_concurrent_lookups: 32,
        }
    }
}

/// Resolves a type plus every dogma reference it carries, one spawned lookup per reference.
///
/// Lookups share a semaphore so a pathological type cannot open an unbounded number of
/// connections; a failed or timed-out lookup only degrades that reference's name.
#[derive(Clone)]
pub struct EnrichmentFanout {
    client: Arc<dyn UpstreamClient>,
    settings: FanoutSettings,
    permits: Arc<Semaphore>,
}

impl EnrichmentFanout {
    pub fn new(client: Arc<dyn UpstreamClient>, settings: FanoutSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_lookups.max(1)));
        Self { client, settings, permits }
    }

    pub async fn fetch_type(&self, type_id: i64) -> Result<TypeResource, UpstreamError> {
        let path = format!("/latest/universe/types/{type_id}/");
        let response = fetch_with_timeout(
            self.client.as_ref(),
            &path,
            FetchOptions::default(),
            self.settings.primary_timeout,
        )
        .await?;
        response.json()
    }

    pub async fn enrich(&self, mut primary: TypeResource) -> EnrichedType {
        let mut lookups = JoinSet::new();

        for (index, attribute) in primary.dogma_attributes.iter_mut().enumerate() {
            attribute.name = UNRESOLVED_NAME.to_owned();
            lookups.spawn(self.clone().resolve(ReferenceKind::Attribute, index, attribute.attribute_id));
        }
        for (index, effect) in primary.dogma_effects.iter_mut().enumerate() {
            effect.name = UNRESOLVED_NAME.to_owned();
            lookups.spawn(self.clone().resolve(ReferenceKind::Effect, index, effect.effect_id));
        }

        let upstream_calls = 1 + lookups.len();
        let mut unresolved = primary.reference_count();

        while let Some(joined) = lookups.join_next().await {
            let resolved = match joined {
                Ok(resolved) => resolved,
                Err(error) => {
                    warn!(
                        event_name = "upstream.enrichment.lookup_aborted",
                        type_id = primary.type_id,
                        error = %error,
                        "reference lookup task did not complete"
                    );
                    continue;
                }
            };

            let Some(name) = resolved.name else {
                continue;
            };
            let slot = match resolved.kind {
                ReferenceKind::Attribute => {
                    primary.dogma_attributes.get_mut(resolved.index).map(|entry| &mut entry.name)
                }
                ReferenceKind::Effect => {
                    primary.dogma_effects.get_mut(resolved.index).map(|entry| &mut entry.name)
                }
            };
            if let Some(slot) = slot {
                *slot = name;
                unresolved -= 1;
            }
        }

        EnrichedType { resource: primary, upstream_calls, unresolved }
    }

    /// Fetches and enriches every id concurrently; results keep the order of `type_ids`.
    pub async fn lookup_types(&self, type_ids: &[i64]) -> Vec<TypeLookup> {
        let mut tasks = JoinSet::new();
        for (position, type_id) in type_ids.iter().copied().enumerate() {
            let fanout = self.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let result = match fanout.fetch_type(type_id).await {
                    Ok(resource) => Ok(fanout.enrich(resource).await),
                    Err(error) => Err(error),
                };
                (position, TypeLookup { type_id, result, elapsed: started.elapsed() })
            });
        }

        let mut slots = type_ids.iter().map(|_| None).collect::<Vec<Option<TypeLookup>>>();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, lookup)) => slots[position] = Some(lookup),
                Err(error) => warn!(
                    event_name = "upstream.enrichment.type_aborted",
                    error = %error,
                    "type lookup task did not complete"
                ),
            }
        }

        slots
            .into_iter()
            .zip(type_ids)
            .map(|(slot, type_id)| {
                slot.unwrap_or_else(|| TypeLookup {
                    type_id: *type_id,
                    result: Err(UpstreamError::Transport("lookup task aborted".to_owned())),
                    elapsed: Duration::ZERO,
                })
            })
            .collect()
    }

    async fn resolve(self, kind: ReferenceKind, index: usize, id: i64) -> ResolvedName {
        let Ok(_permit) = self.permits.acquire().await else {
            return ResolvedName { kind, index, name: None };
        };

        let path = kind.path(id);
        let name = match fetch_with_timeout(
            self.client.as_ref(),
            &path,
            FetchOptions::default(),
            self.settings.lookup_timeout,
        )
        .await
        .and_then(|response| response.json::<NamedResource>())
        {
            Ok(resource) if !resource.name.is_empty() => Some(resource.name),
            Ok(_) => None,
            Err(error) => {
                debug!(
                    event_name = "upstream.enrichment.lookup_failed",
                    path = %path,
                    error = %error,
                    "reference name left unresolved"
                );
                None
            }
        };

        ResolvedName { kind, index, name }
    }
}

/// Pretty-prints `value` and cuts it to `ceiling` bytes, marker included.
pub fn render_payload<T: Serialize>(value: &T, ceiling: usize) -> String {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_owned());
    truncate_payload(rendered, ceiling)
}

pub fn truncate_payload(text: String, ceiling: usize) -> String {
    if text.len() <= ceiling {
        return text;
    }

    let mut cut = ceiling.saturating_sub(TRUNCATION_MARKER.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
    truncated.push_str(&text[..cut]);
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::Instant;

    use super::{
        truncate_payload, EnrichmentFanout, FanoutSettings, TypeResource, TRUNCATION_MARKER,
        UNRESOLVED_NAME,
    };
    use crate::upstream::{InMemoryUpstream, UpstreamError, UpstreamResponse};

    fn settings() -> FanoutSettings {
        FanoutSettings {
            primary_timeout: Duration::from_secs(30),
            lookup_timeout: Duration::from_secs(2),
            max_concurrent_lookups: 16,
        }
    }

    fn attribute_body(name: &str) -> UpstreamResponse {
        UpstreamResponse::ok(serde_json::json!({ "attribute_id": 1, "name": name }).to_string())
    }

    fn primary_with_attributes(ids: &[i64]) -> TypeResource {
        serde_json::from_value(serde_json::json!({
            "type_id": 587,
            "name": "Rifter",
            "group_id": 25,
            "dogma_attributes": ids
                .iter()
                .map(|id| serde_json::json!({ "attribute_id": id, "value": 1.0 }))
                .collect::<Vec<_>>(),
        }))
        .expect("primary")
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_reference_is_marked_unresolved_and_others_resolve_in_parallel() {
        let upstream = InMemoryUpstream::new()
            .respond_after("/v1/dogma/attributes/1/", Duration::from_millis(300), attribute_body("mass"))
            .respond_after("/v1/dogma/attributes/2/", Duration::from_millis(400), attribute_body("capacity"))
            .respond_after("/v1/dogma/attributes/3/", Duration::from_secs(60), attribute_body("never"))
            .respond_after("/v1/dogma/attributes/4/", Duration::from_millis(500), attribute_body("volume"))
            .respond_after("/v1/dogma/attributes/5/", Duration::from_millis(600), attribute_body("radius"));
        let fanout = EnrichmentFanout::new(Arc::new(upstream), settings());

        let started = Instant::now();
        let enriched = fanout.enrich(primary_with_attributes(&[1, 2, 3, 4, 5])).await;
        let elapsed = started.elapsed();

        let names = enriched
            .resource
            .dogma_attributes
            .iter()
            .map(|attribute| attribute.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["mass", "capacity", UNRESOLVED_NAME, "volume", "radius"]);
        assert_eq!(enriched.unresolved, 1);
        assert_eq!(enriched.upstream_calls, 6);
        // bounded by the slowest lookup (the 2s timeout), not the sum of all lookups
        assert!(elapsed < Duration::from_millis(2_500), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn failed_reference_lookups_never_fail_enrichment() {
        let upstream = InMemoryUpstream::new()
            .respond("/v1/dogma/attributes/9/", attribute_body("shieldCapacity"))
            .fail("/v1/dogma/effects/11/", UpstreamError::Transport("reset".to_owned()))
            .respond(
                "/v1/dogma/effects/12/",
                UpstreamResponse { status: 420, body: b"error limited".to_vec(), etag: None },
            );
        let fanout = EnrichmentFanout::new(Arc::new(upstream), settings());
        let mut primary = primary_with_attributes(&[9]);
        primary.dogma_effects = serde_json::from_value(serde_json::json!([
            { "effect_id": 11, "is_default": false },
            { "effect_id": 12, "is_default": true },
        ]))
        .expect("effects");

        let enriched = fanout.enrich(primary).await;

        assert_eq!(enriched.resource.dogma_attributes[0].name, "shieldCapacity");
        assert_eq!(enriched.resource.dogma_effects[0].name, UNRESOLVED_NAME);
        assert_eq!(enriched.resource.dogma_effects[1].name, UNRESOLVED_NAME);
        assert_eq!(enriched.unresolved, 2);
    }

    #[tokio::test]
    async fn lookup_types_keeps_input_order_and_isolates_failures() {
        let upstream = InMemoryUpstream::new()
            .respond(
                "/latest/universe/types/587/",
                UpstreamResponse::ok(
                    serde_json::json!({ "type_id": 587, "name": "Rifter", "mass": 1067000.0 })
                        .to_string(),
                ),
            )
            .respond(
                "/latest/universe/types/34/",
                UpstreamResponse::ok(
                    serde_json::json!({
                        "type_id": 34,
                        "name": "Tritanium",
                        "dogma_attributes": [{ "attribute_id": 161, "value": 0.01 }],
                    })
                    .to_string(),
                ),
            )
            .respond("/v1/dogma/attributes/161/", attribute_body("volume"));
        let fanout = EnrichmentFanout::new(Arc::new(upstream), settings());

        let lookups = fanout.lookup_types(&[587, 1, 34]).await;

        assert_eq!(lookups.iter().map(|lookup| lookup.type_id).collect::<Vec<_>>(), vec![587, 1, 34]);
        let rifter = lookups[0].result.as_ref().expect("rifter");
        assert_eq!(rifter.resource.name, "Rifter");
        assert_eq!(rifter.resource.extra.get("mass"), Some(&serde_json::json!(1067000.0)));
        assert_eq!(lookups[1].result.as_ref().expect_err("missing type").status(), Some(404));
        let tritanium = lookups[2].result.as_ref().expect("tritanium");
        assert_eq!(tritanium.resource.dogma_attributes[0].name, "volume");
        assert_eq!(tritanium.upstream_calls, 2);
    }

    #[test]
    fn truncation_appends_marker_within_ceiling() {
        let text = "x".repeat(200);
        let truncated = truncate_payload(text, 64);
        assert_eq!(truncated.len(), 64);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(100);
        let truncated = truncate_payload(text, 40);
        assert!(truncated.len() <= 40);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn short_payloads_are_untouched() {
        assert_eq!(truncate_payload("{}".to_owned(), 64), "{}");
    }
}
