use reqwest::{Client, StatusCode};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use registre_core::{
    model::{ExportFormat, ExportId, ExportStatus, RegistryDirection, Siret},
    ports::{ApiError, RegistryApi},
};

use crate::TrackdechetsClient;

const TOKEN: &str = "secret-token";
const SIRET: &str = "12345678901234";
const START: &str = "2024-01-01T00:00:00Z";
const END: &str = "2024-01-31T23:59:59Z";

fn client(server: &MockServer) -> TrackdechetsClient {
    TrackdechetsClient::new(Client::new(), server.uri(), &format!("  {TOKEN}\n"))
}

fn siret() -> Siret {
    Siret::parse(SIRET).expect("valid siret")
}

fn graphql_data(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
}

fn generated(id: &str) -> ResponseTemplate {
    graphql_data(json!({ "generateRegistryV2Export": { "id": id, "status": "PENDING" } }))
}

fn date_range(lower: &str, upper: &str) -> serde_json::Value {
    let mut bounds = serde_json::Map::new();
    bounds.insert(lower.to_owned(), json!(START));
    bounds.insert(upper.to_owned(), json!(END));
    json!({ "variables": { "dateRange": bounds } })
}

async fn generate(server: &MockServer) -> Result<registre_core::RegistryExportJob, ApiError> {
    client(server)
        .generate_registry_export(
            RegistryDirection::Outgoing,
            &siret(),
            START,
            END,
            ExportFormat::Xlsx,
        )
        .await
}

#[tokio::test]
async fn lists_establishments_sorted_with_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(body_string_contains("MyCompanies"))
        .respond_with(graphql_data(json!({
            "me": { "companies": [
                { "name": "zeta recyclage", "siret": "00000000000003" },
                { "name": "Alpha Déchets", "siret": "00000000000002" },
                { "name": "No identifier", "siret": null },
                { "name": "alpha déchets", "siret": "00000000000001" },
                { "name": "Foreign", "siret": "" }
            ] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let establishments = client(&server)
        .list_accessible_establishments()
        .await
        .expect("listing succeeds");

    let sirets: Vec<&str> = establishments
        .iter()
        .map(|establishment| establishment.siret.as_str())
        .collect();
    assert_eq!(
        sirets,
        ["00000000000001", "00000000000002", "00000000000003"],
        "sorted by lower-cased name then siret, entries without siret skipped"
    );
}

#[tokio::test]
async fn graphql_errors_are_joined() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [ { "message": "Not allowed" }, { "extensions": {} } ]
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_accessible_establishments()
        .await
        .expect_err("graphql error surfaced");
    assert_eq!(err.to_string(), "Not allowed; Unknown error", "messages joined");
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_accessible_establishments()
        .await
        .expect_err("401 surfaced");
    assert!(
        matches!(&err, ApiError::Status { status, body, .. } if *status == StatusCode::UNAUTHORIZED && body == "unauthorized"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn non_json_body_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_accessible_establishments()
        .await
        .expect_err("html rejected");
    assert!(matches!(err, ApiError::NonJson { .. }), "got {err:?}");
}

#[tokio::test]
async fn generation_uses_first_key_convention_when_accepted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "variables": {
                "registryType": "OUTGOING",
                "format": "XLSX",
                "siret": SIRET,
                "dateRange": { "gte": START, "lte": END }
            }
        })))
        .respond_with(generated("exp-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(date_range("_gte", "_lte")))
        .respond_with(generated("exp-legacy"))
        .expect(0)
        .mount(&server)
        .await;

    let job = generate(&server).await.expect("generated");
    assert_eq!(job.export_id, ExportId("exp-1".into()), "first convention used");
    assert_eq!(job.status, ExportStatus::Pending, "status parsed");
}

#[tokio::test]
async fn generation_falls_back_to_second_key_convention() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(date_range("gte", "lte")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [ { "message": "Field \"gte\" is not defined by type \"DateFilter\"" } ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(date_range("_gte", "_lte")))
        .respond_with(generated("exp-legacy"))
        .expect(1)
        .mount(&server)
        .await;

    let job = generate(&server).await.expect("generated with fallback");
    assert_eq!(job.export_id, ExportId("exp-legacy".into()), "second convention used");
}

#[tokio::test]
async fn generation_propagates_error_when_both_conventions_fail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(date_range("gte", "lte")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [ { "message": "first failure" } ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(date_range("_gte", "_lte")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [ { "message": "Un export a été généré il y a moins de 5 minutes" } ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = generate(&server).await.expect_err("both attempts fail");
    assert!(err.is_cooldown_conflict(), "last error propagated, got {err}");
}

#[tokio::test]
async fn search_keeps_exact_siret_match_only() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "clue": SIRET } })))
        .respond_with(graphql_data(json!({
            "searchCompanies": [
                { "name": "Near miss", "siret": "12345678901299", "etatAdministratif": "A" },
                { "name": "Exact", "siret": SIRET, "etatAdministratif": "A" }
            ]
        })))
        .mount(&server)
        .await;

    let hit = client(&server)
        .search_establishment(&siret())
        .await
        .expect("search succeeds")
        .expect("exact match found");
    assert_eq!(hit.name, "Exact", "exact siret kept");
    assert_eq!(hit.administrative_state.as_deref(), Some("A"), "state mapped");
}

#[tokio::test]
async fn lookup_maps_infos_and_handles_absence() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "siret": SIRET } })))
        .respond_with(graphql_data(json!({
            "companyInfos": {
                "name": "Alpha Déchets",
                "address": "1 rue du Port 44000 Nantes",
                "siret": null,
                "isRegistered": true
            }
        })))
        .mount(&server)
        .await;

    let info = client(&server)
        .lookup_establishment(&siret())
        .await
        .expect("lookup succeeds")
        .expect("company found");
    assert_eq!(info.siret, siret(), "requested siret used when missing");
    assert_eq!(info.is_registered, Some(true), "registration flag mapped");

    let empty = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(graphql_data(json!({ "companyInfos": null })))
        .mount(&empty)
        .await;
    assert!(
        client(&empty)
            .lookup_establishment(&siret())
            .await
            .expect("lookup succeeds")
            .is_none(),
        "absent company"
    );
}

#[tokio::test]
async fn status_and_signed_url_are_read() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "id": "exp-1" } })))
        .respond_with(graphql_data(json!({
            "registryV2Export": { "id": "exp-1", "status": "SUCCESSFUL" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "exportId": "exp-1" } })))
        .respond_with(graphql_data(json!({
            "registryV2ExportDownloadSignedUrl": { "signedUrl": "https://files.example/exp-1" }
        })))
        .mount(&server)
        .await;

    let api = client(&server);
    let export_id = ExportId("exp-1".into());
    assert_eq!(
        api.export_status(&export_id).await.expect("status"),
        ExportStatus::Successful,
        "status parsed"
    );
    assert_eq!(
        api.download_url(&export_id).await.expect("url"),
        "https://files.example/exp-1",
        "signed url returned"
    );
}

#[tokio::test]
async fn download_returns_bytes_and_rejects_failures() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/registre.xlsx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04data".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/expired.xlsx"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let api = client(&server);
    let bytes = api
        .download_bytes(&format!("{}/files/registre.xlsx", server.uri()))
        .await
        .expect("download succeeds");
    assert_eq!(bytes, b"PK\x03\x04data", "raw content");

    let err = api
        .download_bytes(&format!("{}/files/expired.xlsx", server.uri()))
        .await
        .expect_err("expired url rejected");
    assert!(
        matches!(err, ApiError::Download { status } if status == StatusCode::FORBIDDEN),
        "got {err:?}"
    );
}
