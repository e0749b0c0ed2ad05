//! Registry API implementation for the Trackdéchets GraphQL endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use registre_core::{
    model::{
        EstablishmentAccess, EstablishmentInfo, EstablishmentSearchHit, ExportFormat, ExportId,
        ExportStatus, RegistryDirection, RegistryExportJob, Siret, sort_establishments,
    },
    ports::{ApiError, RegistryApi},
};

#[cfg(test)]
mod tests;

/// Production GraphQL endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.trackdechets.beta.gouv.fr";

const GRAPHQL_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

// Backend versions disagree on the names of the date filter bounds.
const DATE_RANGE_KEYS: (&str, &str) = ("gte", "lte");
const FALLBACK_DATE_RANGE_KEYS: (&str, &str) = ("_gte", "_lte");

const MY_COMPANIES: &str = "
query MyCompanies {
  me {
    companies {
      name
      siret
    }
  }
}";

const COMPANY_INFOS: &str = "
query CompanyInfos($siret: String!) {
  companyInfos(siret: $siret) {
    name
    address
    siret
    isRegistered
  }
}";

const SEARCH_COMPANIES: &str = "
query SearchCompanies($clue: String!) {
  searchCompanies(clue: $clue) {
    name
    siret
    etatAdministratif
  }
}";

const GENERATE_EXPORT: &str = "
mutation GenerateRegistryV2Export(
  $registryType: RegistryV2ExportType!,
  $format: RegistryExportFormat!,
  $siret: String!,
  $dateRange: DateFilter!
) {
  generateRegistryV2Export(
    registryType: $registryType,
    format: $format,
    siret: $siret,
    dateRange: $dateRange
  ) {
    id
    status
  }
}";

const EXPORT_STATUS: &str = "
query RegistryV2Export($id: ID!) {
  registryV2Export(id: $id) {
    id
    status
  }
}";

const EXPORT_DOWNLOAD_URL: &str = "
query RegistryV2ExportDownloadSignedUrl($exportId: String!) {
  registryV2ExportDownloadSignedUrl(exportId: $exportId) {
    signedUrl
  }
}";

/// Envelope of every GraphQL answer.
#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorEntry>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MyCompaniesData {
    me: Option<Me>,
}

#[derive(Debug, Deserialize)]
struct Me {
    #[serde(default)]
    companies: Option<Vec<CompanyEntry>>,
}

#[derive(Debug, Deserialize)]
struct CompanyEntry {
    name: Option<String>,
    siret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyInfosData {
    company_infos: Option<CompanyInfosEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyInfosEntry {
    name: Option<String>,
    address: Option<String>,
    siret: Option<String>,
    is_registered: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchCompaniesData {
    search_companies: Option<Vec<SearchEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchEntry {
    name: Option<String>,
    siret: Option<String>,
    etat_administratif: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateExportData {
    generate_registry_v2_export: Option<ExportEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportStatusData {
    registry_v2_export: Option<ExportEntry>,
}

#[derive(Debug, Deserialize)]
struct ExportEntry {
    id: Option<String>,
    status: Option<String>,
}

impl From<ExportEntry> for RegistryExportJob {
    fn from(entry: ExportEntry) -> Self {
        Self {
            export_id: ExportId(entry.id.unwrap_or_default()),
            status: ExportStatus::from(entry.status.unwrap_or_default().as_str()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadUrlData {
    registry_v2_export_download_signed_url: Option<SignedUrlEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlEntry {
    signed_url: Option<String>,
}

/// Authenticated Trackdéchets API client.
pub struct TrackdechetsClient {
    client: Client,
    endpoint: String,
    token: String,
}

impl TrackdechetsClient {
    /// Create a client for `endpoint` sending `token` as bearer credential.
    #[must_use]
    pub fn new(client: Client, endpoint: impl Into<String>, token: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: token.trim().to_owned(),
        }
    }

    async fn post<T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> Result<T, ApiError> {
        debug!(operation, "GraphQL request");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .timeout(GRAPHQL_TIMEOUT)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::status(status, &body));
        }

        let envelope: GraphQlResponse =
            serde_json::from_str(&body).map_err(|_err| ApiError::non_json(&body))?;

        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            let messages = errors
                .into_iter()
                .map(|entry| entry.message.unwrap_or_else(|| "Unknown error".to_owned()))
                .collect();
            return Err(ApiError::GraphQl { messages });
        }

        serde_json::from_value(envelope.data.unwrap_or(Value::Object(Map::new()))).map_err(
            |err| ApiError::Decode {
                message: format!("{operation}: {err}"),
            },
        )
    }

    async fn generate_with_keys(
        &self,
        keys: (&str, &str),
        variables: &Map<String, Value>,
        range_start: &str,
        range_end: &str,
    ) -> Result<RegistryExportJob, ApiError> {
        let (lower, upper) = keys;
        let mut date_range = Map::new();
        date_range.insert(lower.to_owned(), Value::from(range_start));
        date_range.insert(upper.to_owned(), Value::from(range_end));

        let mut variables = variables.clone();
        variables.insert("dateRange".to_owned(), Value::Object(date_range));

        let data: GenerateExportData = self
            .post(
                "GenerateRegistryV2Export",
                GENERATE_EXPORT,
                Value::Object(variables),
            )
            .await?;

        Ok(data
            .generate_registry_v2_export
            .map(RegistryExportJob::from)
            .unwrap_or_else(|| RegistryExportJob {
                export_id: ExportId(String::new()),
                status: ExportStatus::Other(String::new()),
            }))
    }
}

#[async_trait]
impl RegistryApi for TrackdechetsClient {
    async fn list_accessible_establishments(&self) -> Result<Vec<EstablishmentAccess>, ApiError> {
        let data: MyCompaniesData = self.post("MyCompanies", MY_COMPANIES, json!({})).await?;

        let mut establishments: Vec<EstablishmentAccess> = data
            .me
            .and_then(|me| me.companies)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|company| {
                let raw = company.siret.filter(|siret| !siret.is_empty())?;
                match Siret::parse(&raw) {
                    Ok(siret) => Some(EstablishmentAccess {
                        name: company.name.unwrap_or_default(),
                        siret,
                    }),
                    Err(err) => {
                        debug!(error = %err, "Skipping establishment with unusable identifier");
                        None
                    }
                }
            })
            .collect();

        sort_establishments(&mut establishments);
        Ok(establishments)
    }

    async fn lookup_establishment(
        &self,
        siret: &Siret,
    ) -> Result<Option<EstablishmentInfo>, ApiError> {
        let data: CompanyInfosData = self
            .post(
                "CompanyInfos",
                COMPANY_INFOS,
                json!({ "siret": siret.as_str() }),
            )
            .await?;

        Ok(data.company_infos.map(|info| EstablishmentInfo {
            name: info.name.unwrap_or_default(),
            address: info.address.unwrap_or_default(),
            siret: info
                .siret
                .and_then(|raw| Siret::parse(&raw).ok())
                .unwrap_or_else(|| siret.clone()),
            is_registered: info.is_registered,
        }))
    }

    async fn search_establishment(
        &self,
        siret: &Siret,
    ) -> Result<Option<EstablishmentSearchHit>, ApiError> {
        let data: SearchCompaniesData = self
            .post(
                "SearchCompanies",
                SEARCH_COMPANIES,
                json!({ "clue": siret.as_str() }),
            )
            .await?;

        Ok(data
            .search_companies
            .unwrap_or_default()
            .into_iter()
            .find(|company| company.siret.as_deref() == Some(siret.as_str()))
            .map(|company| EstablishmentSearchHit {
                name: company.name.unwrap_or_default(),
                siret: siret.clone(),
                administrative_state: company.etat_administratif,
            }))
    }

    async fn generate_registry_export(
        &self,
        direction: RegistryDirection,
        siret: &Siret,
        range_start: &str,
        range_end: &str,
        format: ExportFormat,
    ) -> Result<RegistryExportJob, ApiError> {
        let mut variables = Map::new();
        variables.insert(
            "registryType".to_owned(),
            Value::from(direction.wire_name()),
        );
        variables.insert("format".to_owned(), Value::from(format.wire_name()));
        variables.insert("siret".to_owned(), Value::from(siret.as_str()));

        match self
            .generate_with_keys(DATE_RANGE_KEYS, &variables, range_start, range_end)
            .await
        {
            Ok(job) => Ok(job),
            Err(err) => {
                warn!(error = %err, "Export generation rejected, retrying with legacy date range keys");
                self.generate_with_keys(FALLBACK_DATE_RANGE_KEYS, &variables, range_start, range_end)
                    .await
            }
        }
    }

    async fn export_status(&self, export_id: &ExportId) -> Result<ExportStatus, ApiError> {
        let data: ExportStatusData = self
            .post(
                "RegistryV2Export",
                EXPORT_STATUS,
                json!({ "id": export_id.0.as_str() }),
            )
            .await?;

        let raw = data
            .registry_v2_export
            .and_then(|export| export.status)
            .unwrap_or_default();
        Ok(ExportStatus::from(raw.as_str()))
    }

    async fn download_url(&self, export_id: &ExportId) -> Result<String, ApiError> {
        let data: DownloadUrlData = self
            .post(
                "RegistryV2ExportDownloadSignedUrl",
                EXPORT_DOWNLOAD_URL,
                json!({ "exportId": export_id.0.as_str() }),
            )
            .await?;

        Ok(data
            .registry_v2_export_download_signed_url
            .and_then(|payload| payload.signed_url)
            .unwrap_or_default())
    }

    async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        // The signed URL carries its own credentials.
        let resp = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Download { status });
        }

        Ok(resp.bytes().await?.to_vec())
    }
}
