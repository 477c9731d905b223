use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Token claims error: {0}")]
    Claims(#[from] serde_json::Error),

    #[error("Token signature is invalid")]
    BadSignature,

    #[error("Token expired")]
    Expired,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value}")]
pub struct ParseValueError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseValueError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
