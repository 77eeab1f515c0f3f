use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("field {0} is not numeric")]
    NotNumeric(&'static str),
    #[error("field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
