//! Program registry: listing of bounty programs and their in-scope assets.

pub mod hackerone;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ProgramListing;

pub use hackerone::HackerOneClient;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Credentials were rejected. Retrying within the same cycle is pointless.
    #[error("registry authentication failed ({status}); check the API token: {body}")]
    Unauthorized { status: u16, body: String },

    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("registry response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid registry url: {0}")]
    Url(#[from] url::ParseError),
}

impl RegistryError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RegistryError::Unauthorized { .. })
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Every listed program. Pagination and rate limiting happen inside.
    async fn list_programs(&self) -> Result<Vec<ProgramListing>, RegistryError>;

    /// Raw in-scope asset identifiers for a program. An empty result means "no scope
    /// data", which callers handle with a fallback; only real failures are errors.
    async fn get_scope(&self, handle: &str) -> Result<Vec<String>, RegistryError>;
}
