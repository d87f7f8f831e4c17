use std::fmt;

use anyhow::Error;
use serde::Serialize;

pub const SOURCE_UNAVAILABLE: &str = "SOURCE_UNAVAILABLE";
pub const DECODE_FAILURE: &str = "DECODE_FAILURE";
pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    /// The source could not be opened: missing path, unreadable file, unsupported or corrupt
    /// format. Raised before any palette work happens.
    SourceUnavailable,
    /// A video frame failed to decode after the stream opened.
    DecodeFailure,
    /// Degenerate construction-time parameters.
    Configuration,
}

impl CodedErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::SourceUnavailable => SOURCE_UNAVAILABLE,
            Self::DecodeFailure => DECODE_FAILURE,
            Self::Configuration => CONFIGURATION_ERROR,
        }
    }

    /// Process exit status used by the CLI for this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => 2,
            Self::SourceUnavailable => 3,
            Self::DecodeFailure => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn new(kind: CodedErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            message: message.into(),
            kind,
        }
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::SourceUnavailable, message)
    }

    pub fn decode_failure(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::DecodeFailure, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Configuration, message)
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

pub fn error_kind(error: &Error) -> Option<CodedErrorKind> {
    find_coded_error(error).map(|coded| coded.kind)
}

/// Envelope for any error; unclassified failures get the generic `INTERNAL` code and the
/// full context chain as the message.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "INTERNAL".to_owned(),
                message: format!("{error:#}"),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};

    use super::{envelope_for, error_kind, find_coded_error, CodedError, CodedErrorKind};

    #[test]
    fn coded_error_is_found_through_context_layers() {
        let error = Err::<(), _>(CodedError::source_unavailable("missing.png does not exist"))
            .context("failed to open source")
            .unwrap_err();
        let coded = find_coded_error(&error).expect("coded error should be in chain");
        assert_eq!(coded.code, "SOURCE_UNAVAILABLE");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::SourceUnavailable));
    }

    #[test]
    fn plain_errors_have_no_kind_and_internal_envelope() {
        let error = anyhow!("boom");
        assert_eq!(error_kind(&error), None);
        let envelope = envelope_for(&error);
        assert!(!envelope.ok);
        assert_eq!(envelope.error.code, "INTERNAL");
    }

    #[test]
    fn envelope_serializes_code_and_message() {
        let error = anyhow::Error::new(CodedError::configuration("color_levels must be >= 2"));
        let json = serde_json::to_value(envelope_for(&error)).expect("envelope should serialize");
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "CONFIGURATION_ERROR");
        assert_eq!(json["error"]["message"], "color_levels must be >= 2");
    }

    #[test]
    fn exit_codes_are_distinct_per_kind() {
        let codes = [
            CodedErrorKind::Configuration.exit_code(),
            CodedErrorKind::SourceUnavailable.exit_code(),
            CodedErrorKind::DecodeFailure.exit_code(),
        ];
        assert_eq!(codes, [2, 3, 4]);
    }
}
