//! Traits describing the registry API and its single error type.

use async_trait::async_trait;
use reqwest::Error as ReqwestError;
use reqwest::StatusCode;

use crate::model::{
    DateRange, EstablishmentAccess, EstablishmentInfo, EstablishmentSearchHit, ExportFormat,
    ExportId, ExportStatus, RegistryDirection, RegistryExportJob, Siret,
};

/// Fragment of the upstream message sent when the same export was generated too recently.
pub const COOLDOWN_MESSAGE_FRAGMENT: &str = "moins de 5 minutes";

const BODY_SNIPPET_LEN: usize = 500;

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to the registry API.
pub enum ApiError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Transport(#[from] ReqwestError),
    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP error: status={status} | body={body}")]
    Status {
        /// Status code received.
        status: StatusCode,
        /// Truncated response body.
        body: String,
        /// Whether the full body carried the cooldown message.
        cooldown: bool,
    },
    /// The body could not be decoded as JSON.
    #[error("Non-JSON response: {body}")]
    NonJson {
        /// Truncated response body.
        body: String,
    },
    /// The JSON body did not have the expected shape.
    #[error("Unexpected response: {message}")]
    Decode {
        /// Decoder message.
        message: String,
    },
    /// The GraphQL response carried an `errors` array.
    #[error("{}", .messages.join("; "))]
    GraphQl {
        /// One message per reported error.
        messages: Vec<String>,
    },
    /// Fetching the signed file URL failed.
    #[error("Download error: status={status}")]
    Download {
        /// Status code received.
        status: StatusCode,
    },
}

impl ApiError {
    /// Build a [`ApiError::Status`] error, truncating the body.
    #[must_use]
    pub fn status(status: StatusCode, body: &str) -> Self {
        Self::Status {
            status,
            body: snippet(body),
            cooldown: body.contains(COOLDOWN_MESSAGE_FRAGMENT),
        }
    }

    /// Build a [`ApiError::NonJson`] error, truncating the body.
    #[must_use]
    pub fn non_json(body: &str) -> Self {
        Self::NonJson {
            body: snippet(body),
        }
    }

    /// Whether the server refused to generate an export because an identical one
    /// was requested less than five minutes ago.
    ///
    /// The API exposes no error code for this, so the message text is matched.
    #[must_use]
    pub fn is_cooldown_conflict(&self) -> bool {
        match self {
            Self::GraphQl { messages } => messages
                .iter()
                .any(|message| message.contains(COOLDOWN_MESSAGE_FRAGMENT)),
            Self::Status { cooldown, .. } => *cooldown,
            Self::Transport(_)
            | Self::NonJson { .. }
            | Self::Decode { .. }
            | Self::Download { .. } => false,
        }
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((cut, _)) => format!("{}...", trimmed.get(..cut).unwrap_or(trimmed)),
        None => trimmed.to_owned(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Parameters of one registry export.
pub struct ExportRequest {
    /// Establishment the registry belongs to.
    pub siret: Siret,
    /// Incoming or outgoing registry.
    pub direction: RegistryDirection,
    /// Days covered.
    pub range: DateRange,
    /// Requested file format.
    pub format: ExportFormat,
}

impl ExportRequest {
    /// Construct an XLSX export request.
    #[must_use]
    pub fn new(siret: Siret, direction: RegistryDirection, range: DateRange) -> Self {
        Self {
            siret,
            direction,
            range,
            format: ExportFormat::Xlsx,
        }
    }
}

#[async_trait]
/// Authenticated access to the registry API.
pub trait RegistryApi: Send + Sync {
    /// Establishments reachable with the credential, sorted by name then identifier.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the request fails.
    async fn list_accessible_establishments(&self) -> Result<Vec<EstablishmentAccess>, ApiError>;

    /// Registration details for one establishment.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the request fails.
    async fn lookup_establishment(
        &self,
        siret: &Siret,
    ) -> Result<Option<EstablishmentInfo>, ApiError>;

    /// Clue-based search restricted to an exact identifier match.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the request fails.
    async fn search_establishment(
        &self,
        siret: &Siret,
    ) -> Result<Option<EstablishmentSearchHit>, ApiError>;

    /// Start an export job.
    ///
    /// `range_start` and `range_end` are ISO-8601 UTC datetimes.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the job cannot be created.
    async fn generate_registry_export(
        &self,
        direction: RegistryDirection,
        siret: &Siret,
        range_start: &str,
        range_end: &str,
        format: ExportFormat,
    ) -> Result<RegistryExportJob, ApiError>;

    /// Current status of an export job.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the request fails.
    async fn export_status(&self, export_id: &ExportId) -> Result<ExportStatus, ApiError>;

    /// Short-lived signed URL for a finished export.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the request fails.
    async fn download_url(&self, export_id: &ExportId) -> Result<String, ApiError>;

    /// Raw bytes behind a signed URL.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure or a non-2xx status.
    async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_messages_are_joined() {
        let err = ApiError::GraphQl {
            messages: vec!["first".to_owned(), "second".to_owned()],
        };
        assert_eq!(err.to_string(), "first; second", "messages joined with '; '");
    }

    #[test]
    fn cooldown_conflict_is_detected_from_message() {
        let conflict = ApiError::GraphQl {
            messages: vec![
                "Un export identique a déjà été généré il y a moins de 5 minutes".to_owned(),
            ],
        };
        assert!(conflict.is_cooldown_conflict(), "cooldown message matches");

        let other = ApiError::GraphQl {
            messages: vec!["Vous n'êtes pas autorisé".to_owned()],
        };
        assert!(!other.is_cooldown_conflict(), "unrelated message does not match");
    }

    #[test]
    fn cooldown_conflict_past_the_body_snippet_is_detected() {
        let body = format!(
            "{{\"errors\":[{{\"detail\":\"{}\",\"message\":\"Export généré il y a moins de 5 minutes\"}}]}}",
            "x".repeat(BODY_SNIPPET_LEN)
        );
        let err = ApiError::status(StatusCode::BAD_REQUEST, &body);
        let ApiError::Status { body: kept, .. } = &err else {
            panic!("expected Status");
        };
        assert!(
            !kept.contains(COOLDOWN_MESSAGE_FRAGMENT),
            "fragment lies beyond the kept snippet"
        );
        assert!(err.is_cooldown_conflict(), "full body is inspected");

        let other = ApiError::status(StatusCode::BAD_REQUEST, &"y".repeat(800));
        assert!(!other.is_cooldown_conflict(), "unrelated body does not match");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(800);
        let ApiError::NonJson { body: kept } = ApiError::non_json(&body) else {
            panic!("expected NonJson");
        };
        assert_eq!(kept.len(), BODY_SNIPPET_LEN + 3, "500 chars plus ellipsis");
        assert!(kept.ends_with("..."), "ellipsis appended");
    }
}
