//! Export orchestration: generate, wait, download, then filter for delivery.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::cache::{ExportCache, ExportKey};
use crate::dataset::{DatasetError, RegistryDataset};
use crate::model::{
    DateRange, EstablishmentAccess, ExportFormat, ExportId, ExportStatus, RegistryDirection,
    RegistryExportJob, Siret, registry_file_name,
};
use crate::ports::{ApiError, ExportRequest, RegistryApi};

/// Delay between two status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Wall-clock budget for an export to finish.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Fixed-interval polling with an overall budget.
pub struct PollPolicy {
    /// Delay between two status polls.
    pub interval: Duration,
    /// Give up once this much time has elapsed without a terminal status.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout: POLL_TIMEOUT,
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Reasons an export could not be delivered.
pub enum ExportError {
    /// The API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The same export was generated minutes ago and no earlier job is known.
    #[error("Export already generated less than 5 minutes ago, try again in a few minutes")]
    CooldownConflict,
    /// The job did not finish within the polling budget.
    #[error("Export still running after {}s, try again in a few minutes", .waited.as_secs())]
    Timeout {
        /// Time spent waiting.
        waited: Duration,
    },
    /// The job ended without producing a file.
    #[error("Export ended with status {status}")]
    JobFailed {
        /// Terminal status reported by the server.
        status: ExportStatus,
    },
    /// Generation answered without a job identifier.
    #[error("Export could not be started")]
    MissingExportId,
    /// The downloaded file is empty.
    #[error("Downloaded file is empty, check the period or the SIRET")]
    EmptyFile,
    /// Re-serializing the filtered dataset failed.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Job an export is served from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedJob {
    /// Job created by this request, still to be awaited.
    Fresh(RegistryExportJob),
    /// Earlier job reused after a cooldown conflict, file already fetched.
    Recovered {
        /// Identifier of the reused job.
        export_id: ExportId,
        /// File content.
        bytes: Vec<u8>,
    },
}

impl ResolvedJob {
    /// Identifier of the underlying job.
    #[must_use]
    pub fn export_id(&self) -> &ExportId {
        match self {
            Self::Fresh(job) => &job.export_id,
            Self::Recovered { export_id, .. } => export_id,
        }
    }

    /// Last known status; a recovered job is always complete.
    #[must_use]
    pub fn status(&self) -> ExportStatus {
        match self {
            Self::Fresh(job) => job.status.clone(),
            Self::Recovered { .. } => ExportStatus::Successful,
        }
    }

    /// Whether the job was reused from the cache.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A finished export, as downloaded.
pub struct RegistryDownload {
    /// Parameters the export was generated with.
    pub request: ExportRequest,
    /// Job the file comes from.
    pub export_id: ExportId,
    /// Whether an earlier job was reused.
    pub recovered: bool,
    /// Raw file content.
    pub bytes: Vec<u8>,
    /// Parsed sheet, absent when the file could not be read as a spreadsheet.
    pub table: Option<RegistryDataset>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Column filters requested by the user.
pub struct ExportFilters {
    /// Keep only these record types.
    pub types: Option<BTreeSet<String>>,
    /// Keep only records dated within this range.
    pub dates: Option<DateRange>,
}

impl ExportFilters {
    /// Whether any filter is requested.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.types.is_some() || self.dates.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Non-fatal remarks about a prepared export.
pub enum FilterNotice {
    /// No record type column was found, type filter skipped.
    TypeColumnMissing,
    /// No date column was found, date filter skipped.
    DateColumnMissing,
    /// The file could not be parsed, it is offered as downloaded.
    Unparsed,
    /// The export holds no record for the period.
    NoRows,
}

impl FilterNotice {
    /// Message shown to the user.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::TypeColumnMissing => "Could not filter by type: no record type column found",
            Self::DateColumnMissing => "Could not filter by date: no date column found",
            Self::Unparsed => "Could not read the spreadsheet, offering it unfiltered",
            Self::NoRows => "No record found for the period",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// File ready to be handed to the user.
pub struct PreparedExport {
    /// Suggested file name.
    pub file_name: String,
    /// File content.
    pub bytes: Vec<u8>,
    /// Data rows in the file, when known.
    pub row_count: Option<usize>,
    /// Whether a filter changed the content.
    pub filtered: bool,
    /// Remarks to surface.
    pub notices: Vec<FilterNotice>,
}

impl RegistryDownload {
    /// Apply `filters` and produce the file to deliver.
    ///
    /// Without filters the downloaded bytes are passed through untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Dataset`] when the filtered sheet cannot be written.
    pub fn prepare(&self, filters: &ExportFilters) -> Result<PreparedExport, ExportError> {
        let file_name = registry_file_name(
            self.request.direction,
            &self.request.siret,
            &self.request.range,
        );
        let mut notices = Vec::new();
        if self.table.as_ref().is_some_and(RegistryDataset::is_empty) {
            notices.push(FilterNotice::NoRows);
        }

        let table = match (&self.table, filters.is_active()) {
            (Some(table), true) => table,
            (table, active) => {
                if active {
                    notices.push(FilterNotice::Unparsed);
                }
                return Ok(PreparedExport {
                    file_name,
                    bytes: self.bytes.clone(),
                    row_count: table.as_ref().map(RegistryDataset::len),
                    filtered: false,
                    notices,
                });
            }
        };

        let mut dataset = table.clone();
        if let Some(types) = &filters.types {
            let result = dataset.filter_by_type(types);
            if !result.applied() {
                notices.push(FilterNotice::TypeColumnMissing);
            }
            dataset = result.dataset;
        }
        if let Some(range) = &filters.dates {
            let result = dataset.filter_by_date(range);
            if !result.applied() {
                notices.push(FilterNotice::DateColumnMissing);
            }
            dataset = result.dataset;
        }

        debug!(
            before = table.len(),
            after = dataset.len(),
            "Filtered registry rows"
        );

        Ok(PreparedExport {
            file_name,
            bytes: dataset.to_xlsx()?,
            row_count: Some(dataset.len()),
            filtered: dataset.len() != table.len(),
            notices,
        })
    }
}

/// Public entry point for exporting registries.
pub struct ExportService {
    api: Arc<dyn RegistryApi>,
    policy: PollPolicy,
}

impl ExportService {
    /// Create a service with the default polling policy.
    #[must_use]
    pub fn new(api: Arc<dyn RegistryApi>) -> Self {
        Self::with_policy(api, PollPolicy::default())
    }

    /// Create a service with a custom polling policy.
    #[must_use]
    pub fn with_policy(api: Arc<dyn RegistryApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    /// Establishments reachable with the current credential.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the listing fails.
    pub async fn establishments(&self) -> Result<Vec<EstablishmentAccess>, ApiError> {
        self.api.list_accessible_establishments().await
    }

    /// Generate, await and download one registry.
    ///
    /// A cooldown conflict is recovered from `cache` when an export with the
    /// same parameters was generated earlier in the session.
    ///
    /// # Errors
    ///
    /// Returns an [`ExportError`] when the export cannot be produced or downloaded.
    pub async fn fetch_registry(
        &self,
        cache: &mut ExportCache,
        request: &ExportRequest,
    ) -> Result<RegistryDownload, ExportError> {
        let resolved = self.resolve_job(cache, request).await?;
        info!(
            export_id = %resolved.export_id(),
            status = %resolved.status(),
            recovered = resolved.is_recovered(),
            "Export job resolved"
        );

        let recovered = resolved.is_recovered();
        let (export_id, bytes) = match resolved {
            ResolvedJob::Fresh(job) => {
                self.wait_for_completion(&job).await?;
                let bytes = self.download(&job.export_id).await?;
                (job.export_id, bytes)
            }
            ResolvedJob::Recovered { export_id, bytes } => (export_id, bytes),
        };

        if bytes.is_empty() {
            return Err(ExportError::EmptyFile);
        }

        let table = match request.format {
            ExportFormat::Xlsx => match RegistryDataset::from_xlsx(&bytes) {
                Ok(table) => Some(table),
                Err(err) => {
                    warn!(error = %err, "Downloaded registry is not a readable spreadsheet");
                    None
                }
            },
            ExportFormat::Csv => None,
        };

        info!(
            %export_id,
            size = bytes.len(),
            rows = table.as_ref().map(RegistryDataset::len),
            "Registry downloaded"
        );

        Ok(RegistryDownload {
            request: request.clone(),
            export_id,
            recovered,
            bytes,
            table,
        })
    }

    /// Fetch the incoming then the outgoing registry of one establishment.
    ///
    /// # Errors
    ///
    /// Returns the first [`ExportError`] encountered.
    pub async fn fetch_both_directions(
        &self,
        cache: &mut ExportCache,
        siret: &Siret,
        range: DateRange,
    ) -> Result<Vec<RegistryDownload>, ExportError> {
        let mut downloads = Vec::with_capacity(RegistryDirection::ALL.len());
        for direction in RegistryDirection::ALL {
            let request = ExportRequest::new(siret.clone(), direction, range);
            downloads.push(self.fetch_registry(cache, &request).await?);
        }
        Ok(downloads)
    }

    async fn resolve_job(
        &self,
        cache: &mut ExportCache,
        request: &ExportRequest,
    ) -> Result<ResolvedJob, ExportError> {
        let key = ExportKey::new(request.siret.clone(), request.direction, &request.range);

        let generated = self
            .api
            .generate_registry_export(
                request.direction,
                &request.siret,
                &key.range_start,
                &key.range_end,
                request.format,
            )
            .await;

        match generated {
            Ok(job) => {
                if job.export_id.is_empty() {
                    return Err(ExportError::MissingExportId);
                }
                cache.record(key, job.export_id.clone());
                Ok(ResolvedJob::Fresh(job))
            }
            Err(err) if err.is_cooldown_conflict() => {
                let Some(entry) = cache.lookup(&key) else {
                    warn!(siret = %request.siret, direction = %request.direction, "Cooldown conflict without a known export");
                    return Err(ExportError::CooldownConflict);
                };
                let export_id = entry.export_id.clone();
                info!(
                    %export_id,
                    siret = %entry.key.siret,
                    direction = %entry.key.direction,
                    range_start = %entry.key.range_start,
                    range_end = %entry.key.range_end,
                    "Cooldown conflict, reusing the previous export"
                );
                let bytes = self.download(&export_id).await?;
                Ok(ResolvedJob::Recovered { export_id, bytes })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn wait_for_completion(&self, job: &RegistryExportJob) -> Result<(), ExportError> {
        let started = Instant::now();
        let mut status = job.status.clone();

        loop {
            match status {
                ExportStatus::Successful => return Ok(()),
                ExportStatus::Failed | ExportStatus::Canceled => {
                    warn!(export_id = %job.export_id, %status, "Export job failed");
                    return Err(ExportError::JobFailed { status });
                }
                ExportStatus::Pending | ExportStatus::Started | ExportStatus::Other(_) => {}
            }

            let waited = started.elapsed();
            if waited >= self.policy.timeout {
                warn!(export_id = %job.export_id, waited_secs = waited.as_secs(), "Export timed out");
                return Err(ExportError::Timeout { waited });
            }

            debug!(export_id = %job.export_id, %status, "Export in progress");
            sleep(self.policy.interval).await;
            status = self.api.export_status(&job.export_id).await?;
        }
    }

    async fn download(&self, export_id: &ExportId) -> Result<Vec<u8>, ApiError> {
        let url = self.api.download_url(export_id).await?;
        self.api.download_bytes(&url).await
    }
}
