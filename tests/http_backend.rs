use httpmock::prelude::*;
use reembolso_client::api::backend::GENERIC_SAVE_ERROR;
use reembolso_client::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const USER_REQUESTS: &str = "/api/framework/v1/consultaSQLServer/RealizaConsulta/ETH.REEM.004/0/T/";

fn backend(server: &MockServer) -> HttpBackend {
    HttpBackend::new(server.url("/api"), Duration::from_secs(5)).unwrap()
}

fn api(server: &MockServer) -> ReembolsoApi {
    ReembolsoApi::new(Arc::new(backend(server)))
}

fn ready_form() -> ReembolsoForm {
    let mut form = ReembolsoForm::new(
        vec![CostCenter {
            code: "05.001".into(),
            name: "Obra Alpha".into(),
        }],
        vec![Project {
            id: 1,
            name: "Obra Alpha".into(),
        }],
    );
    form.select_cost_center("05.001").unwrap();
    form.select_project(0, 1).unwrap();
    form.finish_expense_load(
        1,
        vec![ExpenseType {
            id: 10,
            name: "Alimentação".into(),
            task_id: Some(301),
        }],
    );
    form.set_unit_price(0, 45.9).unwrap();
    form
}

fn app(server: &MockServer) -> ReembolsoApp {
    ReembolsoApp::with_backend(
        AppConfig::default(),
        Arc::new(backend(server)),
        LocalRequests::in_memory(),
    )
}

#[tokio::test]
async fn test_basic_auth_is_sent_under_base_url() {
    let server = MockServer::start_async().await;
    let projects = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/framework/v1/consultaSQLServer/RealizaConsulta/ETH.REEM.002/0/T/")
                .header("authorization", "Basic d2ViOnB3");
            then.status(200)
                .json_body(json!({ "data": [{ "IDPRJ": 1, "NOMEPRJ": "Obra Alpha" }] }));
        })
        .await;

    let backend = backend(&server).with_basic_auth("web", "pw").unwrap();
    let api = ReembolsoApi::new(Arc::new(backend));
    let found = api.get_projects().await;

    projects.assert_async().await;
    assert_eq!(
        found,
        vec![Project {
            id: 1,
            name: "Obra Alpha".into()
        }]
    );
}

#[tokio::test]
async fn test_basic_auth_survives_non_canonical_base_url() {
    let server = MockServer::start_async().await;
    let projects = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/framework/v1/consultaSQLServer/RealizaConsulta/ETH.REEM.002/0/T/")
                .header("authorization", "Basic d2ViOnB3");
            then.status(200)
                .json_body(json!([{ "IDPRJ": 2, "NOMEPRJ": "Portal do Cliente" }]));
        })
        .await;

    let base_url = format!("http://LOCALHOST:{}/api/", server.port());
    let backend = HttpBackend::new(base_url, Duration::from_secs(5))
        .unwrap()
        .with_basic_auth("web", "pw")
        .unwrap();
    let found = ReembolsoApi::new(Arc::new(backend)).get_projects().await;

    projects.assert_async().await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Portal do Cliente");
}

#[tokio::test]
async fn test_no_credentials_sends_no_authorization() {
    let server = MockServer::start_async().await;
    let centers = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/framework/v1/consultaSQLServer/RealizaConsulta/ETH.REEM.001/0/T/")
                .header_missing("authorization");
            then.status(200)
                .json_body(json!([{ "CODCCUSTO": "05.001", "NOME": "Obra Alpha" }]));
        })
        .await;

    let config = AppConfig {
        api_base_url: server.url("/api"),
        ..Default::default()
    };
    let backend = HttpBackend::from_config(&config).unwrap();
    let found = ReembolsoApi::new(Arc::new(backend)).get_cost_centers().await;

    centers.assert_async().await;
    assert_eq!(found[0].code, "05.001");
}

#[tokio::test]
async fn test_expense_types_are_filtered_by_project() {
    let server = MockServer::start_async().await;
    let expenses = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/framework/v1/consultaSQLServer/RealizaConsulta/ETH.REEM.003/0/T/")
                .query_param("parameters", "IDPRJ=2");
            then.status(200).json_body(json!({
                "result": [
                    { "IDDESPESA": "13", "DESCRICAO": "Combustível", "IDTRF": 302 },
                    { "IDDESPESA": 14, "DESCRICAO": "Pedágio" }
                ]
            }));
        })
        .await;

    let found = api(&server).get_expense_types(Some(2)).await;

    expenses.assert_async().await;
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].task_id, Some(302));
    assert_eq!(found[1].task_id, None);
}

#[tokio::test]
async fn test_failed_lookup_reads_as_empty() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(500).json_body(json!({ "message": "boom" }));
        })
        .await;

    assert!(api(&server).get_tasks(1).await.is_empty());
}

#[tokio::test]
async fn test_user_request_listing_falls_through_filters() {
    let server = MockServer::start_async().await;
    let quoted = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(USER_REQUESTS)
                .query_param("parameters", "CODUSUARIO='00060'");
            then.status(500).json_body(json!({ "Message": "Coluna inválida" }));
        })
        .await;
    let unquoted = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(USER_REQUESTS)
                .query_param("parameters", "CODUSUARIO=00060");
            then.status(200).json_body(json!([{
                "IDMOV": 42,
                "SERIE": "REEM",
                "CODCCUSTO": "05.001",
                "DATAEMISSAO": "2025-01-15T00:00:00",
                "VALORBRUTO": "1.234,50",
                "STATUS": "Pago"
            }]));
        })
        .await;
    let unfiltered = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(USER_REQUESTS)
                .query_param_missing("parameters");
            then.status(200).json_body(json!({ "data": [] }));
        })
        .await;

    let fetch = api(&server).fetch_user_requests("00060").await;

    quoted.assert_async().await;
    unquoted.assert_async().await;
    unfiltered.assert_async().await;
    assert_eq!(fetch.attempts, 11);
    // The quoted attempt and the eight unmatched columns fail.
    assert_eq!(fetch.failures, 9);
    assert!(!fetch.all_failed());

    assert_eq!(fetch.items.len(), 1);
    let item = &fetch.items[0];
    assert_eq!(item.id, "42");
    assert_eq!(item.date, "15/01/2025");
    assert_eq!(item.total, 1234.5);
    assert_eq!(item.status, RequestStatus::Paid);
}

#[tokio::test]
async fn test_list_hydrates_through_filter_lookup() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(USER_REQUESTS)
                .query_param_missing("parameters");
            then.status(200)
                .json_body(json!([{ "IDMOV": 77, "STATUS": "Em aprovação" }]));
        })
        .await;
    let detail = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/mov/v1/Movements")
                .query_param("filter", "companyId eq 1 and id eq 77");
            then.status(200).json_body(json!({
                "items": [{
                    "registerDate": "2025-02-03T00:00:00-03:00",
                    "grossValue": 99.9,
                    "movementItems": [{
                        "costCenterApportionments": [{ "costCenterCode": "02.003" }]
                    }]
                }]
            }));
        })
        .await;

    let list = app(&server).load_requests().await;

    detail.assert_async().await;
    assert!(list.error.is_none());
    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].total, 99.9);
    assert_eq!(list.items[0].date, "03/02/2025");
    assert_eq!(list.items[0].cost_center, "02.003");
}

#[tokio::test]
async fn test_submit_posts_movement_and_caches_result() {
    let server = MockServer::start_async().await;
    let save = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/mov/v1/Movements")
                .body_includes("\"grossValue\":45.9")
                .body_includes("\"costCenterCode\":\"05.001\"")
                .body_includes("\"bugdetNatureCode\"");
            then.status(201).json_body(json!({ "id": 9001 }));
        })
        .await;
    // The ERP has not indexed the new movement yet.
    server
        .mock_async(|when, then| {
            when.method(GET).path(USER_REQUESTS);
            then.status(200).json_body(json!([]));
        })
        .await;

    let app = app(&server);
    let created = app.submit(&ready_form()).await.unwrap();

    save.assert_async().await;
    assert_eq!(created.id, "9001");
    assert_eq!(created.status, RequestStatus::Pending);
    assert_eq!(app.cache().list()[0].id, "9001");

    let list = app.load_requests().await;
    assert!(list.error.is_none());
    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].id, "9001");
    assert_eq!(list.items[0].status.label(), "Em Aprovação");
    assert_eq!(list.items[0].total, 45.9);
}

#[tokio::test]
async fn test_submit_surfaces_erp_error_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/mov/v1/Movements");
            then.status(400)
                .json_body(json!({ "error": { "DetailedMessage": "Centro de custo inativo." } }));
        })
        .await;

    let app = app(&server);
    let err = app.submit(&ready_form()).await.unwrap_err();

    assert!(matches!(err, ReembolsoError::Api { status: 400, .. }));
    assert_eq!(err.user_message(), "Centro de custo inativo.");
    assert!(app.cache().list().is_empty());
}

#[tokio::test]
async fn test_submit_without_error_body_uses_generic_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/mov/v1/Movements");
            then.status(500);
        })
        .await;

    let err = app(&server).submit(&ready_form()).await.unwrap_err();
    assert_eq!(err.user_message(), GENERIC_SAVE_ERROR);
}
