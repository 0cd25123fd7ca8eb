use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::status::RouteSnapshot;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

impl Segment {
    pub fn parse(raw: &str) -> Self {
        if is_placeholder(raw) {
            Self::Placeholder(raw[1..raw.len() - 1].to_owned())
        } else {
            Self::Literal(raw.to_owned())
        }
    }
}

fn is_placeholder(raw: &str) -> bool {
    raw.len() >= 2 && raw.starts_with('{') && raw.ends_with('}')
}

/// Splits a route path on `/` after trimming leading and trailing slashes.
///
/// An empty or slash-only path yields a single empty segment.
pub fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTemplate {
    segments: Vec<Segment>,
}

impl RouteTemplate {
    /// Returns `None` for paths without any segment (`""`, `"/"`).
    pub fn parse(path: &str) -> Option<Self> {
        if path.trim_matches('/').is_empty() {
            return None;
        }

        Some(Self { segments: split_path(path).into_iter().map(Segment::parse).collect() })
    }

    pub fn matches<S: AsRef<str>>(&self, input: &[S]) -> bool {
        if self.segments.len() != input.len() {
            return false;
        }

        let Some(last) = self.segments.len().checked_sub(1) else {
            return false;
        };
        for (index, (segment, candidate)) in self.segments.iter().zip(input).enumerate() {
            match segment {
                // trailing placeholder accepts whatever is left
                Segment::Placeholder(_) if index == last => return true,
                Segment::Placeholder(_) => continue,
                Segment::Literal(literal) if literal == candidate.as_ref() => {
                    if index == last {
                        return true;
                    }
                }
                Segment::Literal(_) => return false,
            }
        }

        false
    }
}

/// GET route templates used to validate free-text upstream paths.
///
/// The template list is only ever replaced as a whole, so a reader sees either the previous or
/// the rebuilt table, never a mix.
pub struct RouteTable {
    templates: ArcSwap<Vec<RouteTemplate>>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self { templates: ArcSwap::from_pointee(Vec::new()) }
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(templates: Vec<RouteTemplate>) -> Self {
        Self { templates: ArcSwap::from_pointee(templates) }
    }

    /// Rebuilds the table from the snapshot's GET entries, returning the template count.
    pub fn rebuild(&self, snapshot: &RouteSnapshot) -> usize {
        let templates = snapshot
            .entries
            .iter()
            .filter(|entry| entry.method.eq_ignore_ascii_case("get"))
            .filter_map(|entry| RouteTemplate::parse(&entry.path))
            .collect::<Vec<_>>();
        let count = templates.len();
        self.replace(templates);
        count
    }

    fn replace(&self, templates: Vec<RouteTemplate>) {
        self.templates.store(Arc::new(templates));
    }

    pub fn matches<S: AsRef<str>>(&self, segments: &[S]) -> bool {
        self.templates.load().iter().any(|template| template.matches(segments))
    }

    pub fn len(&self) -> usize {
        self.templates.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.load().is_empty()
    }
}
