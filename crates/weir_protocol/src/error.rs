use thiserror::Error;

/// Errors raised while parsing canonical values from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid {kind}: '{value}'. {hint}")]
    Invalid {
        kind: &'static str,
        value: String,
        hint: String,
    },

    #[error("Timestamp '{0}' has no UTC offset; timestamps must be timezone aware")]
    NaiveTimestamp(String),
}

impl ParseError {
    pub fn invalid(kind: &'static str, value: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            value: value.into(),
            hint: hint.into(),
        }
    }
}
