//! Domain data structures for establishments, registries, and export jobs.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// First day covered by a complete registry export.
pub const FULL_HISTORY_START: (i32, u32, u32) = (2000, 1, 1);

/// Record types (bordereaux) that can appear in a registry export.
pub const BSD_TYPES: [&str; 6] = ["BSDD", "BSDA", "BSFF", "BSVHU", "BSDASRI", "BSPAOH"];

const SIRET_LEN: usize = 14;
const ISO_DATE: &str = "%Y-%m-%d";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Input rejected before any request is sent.
pub enum ValidationError {
    /// The identifier is not exactly 14 decimal digits.
    #[error("SIRET must contain exactly 14 digits, got {0:?}")]
    InvalidSiret(String),
    /// The range starts after it ends.
    #[error("Start date {start} is after end date {end}")]
    InvertedRange {
        /// Requested first day.
        start: NaiveDate,
        /// Requested last day.
        end: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// National 14-digit establishment identifier.
pub struct Siret(String);

impl Siret {
    /// Validate and wrap an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidSiret`] unless the trimmed input is 14 ASCII digits.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.len() == SIRET_LEN && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            Ok(Self(trimmed.to_owned()))
        } else {
            Err(ValidationError::InvalidSiret(raw.to_owned()))
        }
    }

    /// Borrow the digits.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Siret {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Inclusive start/end range of calendar days covered by an export.
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting one that ends before it starts.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvertedRange`] when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Everything from [`FULL_HISTORY_START`] up to `today`.
    #[must_use]
    pub fn full_history(today: NaiveDate) -> Self {
        let (year, month, day) = FULL_HISTORY_START;
        let start = NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN);
        Self {
            start: start.min(today),
            end: today,
        }
    }

    /// From the first day of the current month up to `today`.
    #[must_use]
    pub fn current_month(today: NaiveDate) -> Self {
        Self {
            start: today.with_day(1).unwrap_or(today),
            end: today,
        }
    }

    /// Start date (inclusive).
    #[must_use]
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// End date (inclusive).
    #[must_use]
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Whether `date` lies within the range, bounds included.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// UTC datetime bounds: start of the first day, last second of the last day.
    #[must_use]
    pub fn iso_bounds(&self) -> (String, String) {
        (
            format!("{}T00:00:00Z", self.start.format(ISO_DATE)),
            format!("{}T23:59:59Z", self.end.format(ISO_DATE)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Which side of the waste transfers a registry lists.
pub enum RegistryDirection {
    /// Waste received by the establishment.
    Incoming,
    /// Waste emitted by the establishment.
    Outgoing,
}

impl RegistryDirection {
    /// Both directions, incoming first.
    pub const ALL: [Self; 2] = [Self::Incoming, Self::Outgoing];

    /// Value expected by the API.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Incoming => "INCOMING",
            Self::Outgoing => "OUTGOING",
        }
    }

    /// Human label used by the UI.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Incoming => "Registre entrant (réception)",
            Self::Outgoing => "Registre sortant (émetteur)",
        }
    }
}

impl fmt::Display for RegistryDirection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        };
        write!(formatter, "{slug}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
/// File format requested from the export job.
pub enum ExportFormat {
    /// Excel workbook.
    #[default]
    Xlsx,
    /// Comma separated values.
    Csv,
}

impl ExportFormat {
    /// Value expected by the API.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Xlsx => "XLSX",
            Self::Csv => "CSV",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Establishment reachable with the current credential.
pub struct EstablishmentAccess {
    /// Display name.
    pub name: String,
    /// Establishment identifier.
    pub siret: Siret,
}

impl fmt::Display for EstablishmentAccess {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} — {}", self.name, self.siret)
    }
}

/// Sort establishments by lower-cased name, then identifier.
pub fn sort_establishments(establishments: &mut [EstablishmentAccess]) {
    establishments.sort_by(|left, right| {
        left.name
            .to_lowercase()
            .cmp(&right.name.to_lowercase())
            .then_with(|| left.siret.cmp(&right.siret))
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Registration details returned by an establishment lookup.
pub struct EstablishmentInfo {
    /// Registered name.
    pub name: String,
    /// Postal address.
    pub address: String,
    /// Establishment identifier.
    pub siret: Siret,
    /// Whether the establishment is registered on the platform, when known.
    pub is_registered: Option<bool>,
}

impl From<EstablishmentInfo> for EstablishmentAccess {
    fn from(info: EstablishmentInfo) -> Self {
        Self {
            name: info.name,
            siret: info.siret,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Match returned by the clue-based establishment search.
pub struct EstablishmentSearchHit {
    /// Registered name.
    pub name: String,
    /// Establishment identifier.
    pub siret: Siret,
    /// Administrative state (active, closed) reported by the search index.
    pub administrative_state: Option<String>,
}

impl From<EstablishmentSearchHit> for EstablishmentAccess {
    fn from(hit: EstablishmentSearchHit) -> Self {
        Self {
            name: hit.name,
            siret: hit.siret,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Identifier of a server-side export job.
pub struct ExportId(pub String);

impl ExportId {
    /// Whether the server returned no identifier at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ExportId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Lifecycle state of an export job.
pub enum ExportStatus {
    /// Queued.
    Pending,
    /// Being generated.
    Started,
    /// File ready for download.
    Successful,
    /// Generation failed.
    Failed,
    /// Job was canceled.
    Canceled,
    /// Value this client does not know about.
    Other(String),
}

impl ExportStatus {
    /// Whether no further transition can happen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Canceled)
    }
}

impl From<&str> for ExportStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "STARTED" => Self::Started,
            "SUCCESSFUL" => Self::Successful,
            "FAILED" => Self::Failed,
            "CANCELED" | "CANCELLED" => Self::Canceled,
            _ => Self::Other(raw.to_owned()),
        }
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Other(raw) => raw.as_str(),
        };
        formatter.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Export job as returned by the generation mutation.
pub struct RegistryExportJob {
    /// Job identifier.
    pub export_id: ExportId,
    /// Status at the time of the response.
    pub status: ExportStatus,
}

/// File name offered for a downloaded registry.
#[must_use]
pub fn registry_file_name(direction: RegistryDirection, siret: &Siret, range: &DateRange) -> String {
    format!(
        "registre_{direction}_{siret}_{}_{}.xlsx",
        range.start().format(ISO_DATE),
        range.end().format(ISO_DATE)
    )
}
