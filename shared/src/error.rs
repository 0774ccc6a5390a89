use thiserror::Error;

/// Why a line of text did not turn into a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No matcher recognised the line.
    #[error("no matcher recognised the line")]
    NoMatch,

    /// A matcher recognised the line but one of its fields could not be converted.
    #[error("malformed {field}: {value:?}")]
    Malformed { field: &'static str, value: String },
}

impl ParseError {
    pub fn malformed(field: &'static str, value: impl Into<String>) -> Self {
        ParseError::Malformed {
            field,
            value: value.into(),
        }
    }
}
