use thiserror::Error;

pub mod analytics;
pub mod chunk;
pub mod conversation;
pub mod document;
pub mod document_image;
pub mod ingestion_job;
pub mod message;
pub mod message_rating;
pub mod quality;
pub mod thumbs_down_validation;
pub mod universe;

/// Raised when a TEXT column holds a value outside the enum it encodes.
#[derive(Debug, Error)]
#[error("unrecognised {column} value: {value}")]
pub struct ColumnEnumError {
    pub column: &'static str,
    pub value: String,
}

impl ColumnEnumError {
    pub(crate) fn decode(column: &'static str, value: &str) -> sqlx::Error {
        sqlx::Error::Decode(Box::new(Self {
            column,
            value: value.to_owned(),
        }))
    }
}
