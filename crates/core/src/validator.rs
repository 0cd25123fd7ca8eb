use std::sync::Arc;

use crate::routes::{split_path, RouteTable};

pub const VERSION_TOKENS: [&str; 9] =
    ["latest", "legacy", "dev", "v1", "v2", "v3", "v4", "v5", "v6"];

pub const DEFAULT_VERSION: &str = "latest";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedPath {
    /// Version-prefixed path, built whether or not a template matched.
    pub canonical: String,
    pub version: String,
    pub matched: bool,
}

pub fn is_version_token(segment: &str) -> bool {
    VERSION_TOKENS.contains(&segment)
}

#[derive(Clone)]
pub struct PathValidator {
    table: Arc<RouteTable>,
}

impl PathValidator {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    pub fn validate(&self, input: &str) -> ValidatedPath {
        let mut segments = split_path(input);

        let version = match segments.first() {
            Some(first) if is_version_token(first) => segments.remove(0).to_owned(),
            _ => DEFAULT_VERSION.to_owned(),
        };

        let matched = self.table.matches(&segments);
        let rest = segments.join("/");
        let canonical =
            if rest.is_empty() { format!("/{version}") } else { format!("/{version}/{rest}") };

        ValidatedPath { canonical, version, matched }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{is_version_token, PathValidator};
    use crate::routes::{RouteTable, RouteTemplate};

    fn validator(paths: &[&str]) -> PathValidator {
        let templates = paths
            .iter()
            .filter_map(|path| RouteTemplate::parse(path))
            .collect::<Vec<_>>();
        PathValidator::new(Arc::new(RouteTable::from_templates(templates)))
    }

    #[test]
    fn unversioned_path_defaults_to_latest() {
        let validator = validator(&["/universe/types/{type_id}/"]);
        let validated = validator.validate("universe/types/32");
        assert_eq!(validated.canonical, "/latest/universe/types/32");
        assert!(validated.matched);
    }

    #[test]
    fn explicit_version_is_kept_and_stripped_before_matching() {
        let validator = validator(&["/universe/types/{type_id}/"]);
        let validated = validator.validate("/legacy/universe/types/32/");

        assert_eq!(validated.version, "legacy");
        assert_eq!(validated.canonical, "/legacy/universe/types/32");
        assert!(validated.matched);
    }

    #[test]
    fn unknown_path_is_rejected_with_canonical_diagnostic() {
        let validator = validator(&["/universe/types/{type_id}/"]);
        let validated = validator.validate("bogus/path");
        assert_eq!(validated.canonical, "/latest/bogus/path");
        assert!(!validated.matched);
    }

    #[test]
    fn non_version_leading_segment_stays_in_path() {
        let validator = validator(&["/v7/status/"]);
        let validated = validator.validate("v7/status");
        assert_eq!(validated.version, "latest");
        assert_eq!(validated.canonical, "/latest/v7/status");
        assert!(validated.matched);
    }

    #[test]
    fn empty_input_is_rejected() {
        let validator = validator(&["/status/"]);
        let validated = validator.validate("");
        assert!(!validated.matched);
        assert_eq!(validated.canonical, "/latest");
    }

    #[test]
    fn bare_version_has_no_trailing_separator() {
        let validator = validator(&["/status/"]);

        let latest = validator.validate("/latest");
        assert_eq!(latest.canonical, "/latest");
        assert_eq!(latest.version, "latest");
        assert!(!latest.matched);

        assert_eq!(validator.validate("dev/").canonical, "/dev");
    }

    #[test]
    fn recognizes_all_version_tokens() {
        for token in ["latest", "legacy", "dev", "v1", "v2", "v3", "v4", "v5", "v6"] {
            assert!(is_version_token(token), "{token} should be a version token");
        }
        assert!(!is_version_token("v7"));
        assert!(!is_version_token("Latest"));
    }
}
