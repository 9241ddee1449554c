//! Tag Generator
//!
//! Stateless request/response wrapper around the external prompt service
//! that labels an item from its description and optional photo.
//!
//! Request: `{ description, photoDataUri? }`. The photo field is omitted
//! entirely when there is no photo. Response: `{ tags: [..] }`, 3 to 7
//! lowercase tags. The model output is trusted as-is; there is no
//! post-validation and no retry here.

mod http;

pub use http::HttpTagGenerator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::PhotoPayload;

/// Wire request for the tagging prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRequest {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_data_uri: Option<String>,
}

impl TagRequest {
    pub fn new(description: &str, photo: Option<&PhotoPayload>) -> Result<Self, TagGenerationError> {
        if description.trim().is_empty() {
            return Err(TagGenerationError::EmptyDescription);
        }
        Ok(Self {
            description: description.to_string(),
            photo_data_uri: photo.map(PhotoPayload::to_data_uri),
        })
    }
}

/// Wire response of the tagging prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagResponse {
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagGenerationError {
    #[error("description is empty")]
    EmptyDescription,
    #[error("tagging service unreachable: {0}")]
    Transport(String),
    #[error("tagging service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("malformed tagging response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait TagGenerator: Send + Sync {
    async fn generate_tags(&self, request: &TagRequest) -> Result<Vec<String>, TagGenerationError>;
}

/// Build the request and invoke `generator`
pub async fn generate_tags(
    generator: &dyn TagGenerator,
    description: &str,
    photo: Option<&PhotoPayload>,
) -> Result<Vec<String>, TagGenerationError> {
    let request = TagRequest::new(description, photo)?;
    generator.generate_tags(&request).await
}

/// Parse a response body. Tags are returned exactly as the model wrote them.
pub fn parse_response(body: &str) -> Result<Vec<String>, TagGenerationError> {
    let response: TagResponse =
        serde_json::from_str(body).map_err(|e| TagGenerationError::Malformed(e.to_string()))?;
    Ok(response.tags)
}
