use thiserror::Error;

use crate::{status::StatusError, upstream::UpstreamError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("no command matched trigger `{trigger}`")]
    CommandNotFound { trigger: String },
    #[error("`{action}` does not accept flag `--{flag}`")]
    UnknownFlag { action: String, flag: String },
    #[error("`{action}` does not accept `--{flag}={value}`")]
    InvalidFlagValue { action: String, flag: String, value: String, allowed: Vec<String> },
    #[error("upstream unavailable: {detail}")]
    UpstreamUnavailable { status: Option<u16>, detail: String },
    #[error("path `{canonical}` does not match any known route")]
    PathInvalid { canonical: String },
    #[error("invalid arguments: {0}")]
    BadArguments(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The user asked for something the bot cannot do; not a system fault.
    UserInput,
    /// A dependency failed; worth a warning in the logs.
    Degraded,
}

impl CommandError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::UpstreamUnavailable { .. } => ErrorSeverity::Degraded,
            Self::CommandNotFound { .. }
            | Self::UnknownFlag { .. }
            | Self::InvalidFlagValue { .. }
            | Self::PathInvalid { .. }
            | Self::BadArguments(_) => ErrorSeverity::UserInput,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::CommandNotFound { .. } => {
                "Hmmmm...that is a not a recognized command.".to_owned()
            }
            Self::UnknownFlag { action, flag } => {
                format!("`{action}` does not understand `--{flag}`. Drop the flag and try again.")
            }
            Self::InvalidFlagValue { flag, value, allowed, .. } => format!(
                "`{value}` is not a valid value for `--{flag}`. Try one of: `{}`.",
                allowed.join("`, `")
            ),
            Self::UpstreamUnavailable { status: Some(status), detail } => {
                format!("ESI responded with status {status}: {detail}")
            }
            Self::UpstreamUnavailable { status: None, detail } => {
                format!("ESI could not be reached: {detail}")
            }
            Self::PathInvalid { .. } => "Provided Path is not valid. Please validate the path submitted and try again. The following is the final parsed route and what the engine used to validate this request.".to_owned(),
            Self::BadArguments(message) => message.clone(),
        }
    }
}

impl From<UpstreamError> for CommandError {
    fn from(value: UpstreamError) -> Self {
        match value {
            UpstreamError::Status { status, body } => {
                Self::UpstreamUnavailable { status: Some(status), detail: body }
            }
            other => Self::UpstreamUnavailable { status: None, detail: other.to_string() },
        }
    }
}

impl From<StatusError> for CommandError {
    fn from(value: StatusError) -> Self {
        match value {
            StatusError::Upstream(error) => error.into(),
            other => Self::UpstreamUnavailable { status: None, detail: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        errors::{CommandError, ErrorSeverity},
        status::StatusError,
        upstream::UpstreamError,
    };

    #[test]
    fn upstream_status_maps_to_unavailable_with_status_detail() {
        let error = CommandError::from(UpstreamError::Status {
            status: 502,
            body: "bad gateway".to_owned(),
        });

        assert_eq!(
            error,
            CommandError::UpstreamUnavailable {
                status: Some(502),
                detail: "bad gateway".to_owned()
            }
        );
        assert_eq!(error.severity(), ErrorSeverity::Degraded);
        assert_eq!(error.user_message(), "ESI responded with status 502: bad gateway");
    }

    #[test]
    fn status_cache_errors_map_to_unavailable() {
        let error = CommandError::from(StatusError::MissingSnapshot("latest".to_owned()));
        assert!(matches!(error, CommandError::UpstreamUnavailable { status: None, .. }));
    }

    #[test]
    fn flag_errors_are_user_input() {
        let error = CommandError::InvalidFlagValue {
            action: "status".to_owned(),
            flag: "version".to_owned(),
            value: "beta".to_owned(),
            allowed: vec!["dev".to_owned(), "latest".to_owned(), "legacy".to_owned()],
        };

        assert_eq!(error.severity(), ErrorSeverity::UserInput);
        assert_eq!(
            error.user_message(),
            "`beta` is not a valid value for `--version`. Try one of: `dev`, `latest`, `legacy`."
        );
    }

    #[test]
    fn command_not_found_is_not_a_system_error() {
        let error = CommandError::CommandNotFound { trigger: "wat".to_owned() };
        assert_eq!(error.severity(), ErrorSeverity::UserInput);
    }
}
