//! In-process stand-in for the ERP, used when `use_mocks` is set.
//!
//! [`MockDatabase`] is built once by the application and handed to a
//! [`MockBackend`]; its request list survives restarts through the injected
//! persistence.

use crate::api::backend::ErpBackend;
use crate::api::endpoints::{Query, FILTER_KEY, MOVEMENTS_PATH, PARAMETERS_KEY};
use crate::error::{ReembolsoError, Result};
use crate::local_requests::RequestPersistence;
use crate::normalize::{pick_field, pick_string, to_date_br, to_number};
use crate::schema::{
    CostCenter, ExpenseType, Project, RequestListItem, RequestStatus, RequestType, Task,
};
use async_trait::async_trait;
use chrono::{Datelike, Local};
use log::{debug, info, warn};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const DEFAULT_COST_CENTER: &str = "05.001";

fn seed_cost_centers() -> Vec<CostCenter> {
    [
        ("05.001", "Obra Alpha"),
        ("01.001", "TI & Inovação"),
        ("02.003", "Administrativo"),
    ]
    .into_iter()
    .map(|(code, name)| CostCenter {
        code: code.to_string(),
        name: name.to_string(),
    })
    .collect()
}

fn seed_projects() -> Vec<Project> {
    [(1, "Obra Alpha"), (2, "Portal do Cliente"), (3, "Projeto Beta")]
        .into_iter()
        .map(|(id, name)| Project {
            id,
            name: name.to_string(),
        })
        .collect()
}

/// Expense types per project. Project 3 has none configured.
fn seed_expenses() -> Vec<(u32, ExpenseType)> {
    [
        (1, 10, "Alimentação", Some(301)),
        (1, 11, "Hospedagem", Some(301)),
        (1, 12, "Transporte", None),
        (2, 10, "Alimentação", Some(302)),
        (2, 13, "Combustível", Some(302)),
    ]
    .into_iter()
    .map(|(project, id, name, task_id)| {
        (
            project,
            ExpenseType {
                id,
                name: name.to_string(),
                task_id,
            },
        )
    })
    .collect()
}

fn seed_tasks() -> Vec<Task> {
    [(301, "Execução", 1), (303, "Mobilização", 1), (302, "Implantação", 2)]
        .into_iter()
        .map(|(id, name, project_id)| Task {
            id,
            name: name.to_string(),
            project_id,
        })
        .collect()
}

fn seed_requests() -> Vec<RequestListItem> {
    let row = |id: &str, t, cc: &str, date: &str, total, status| RequestListItem {
        id: id.to_string(),
        request_type: t,
        cost_center: cc.to_string(),
        date: date.to_string(),
        total,
        status,
    };
    use RequestStatus::*;
    use RequestType::*;
    vec![
        row("req_2025_000126", Reimbursement, "", "-", 0.0, Pending),
        row("req_2025_000125", Advance, "TI & Inovação", "01/02/2025", 1500.0, Approved),
        row("req_2025_000123", Reimbursement, "Obra Alpha", "15/01/2025", 116.0, Pending),
        row("req_2025_000120", Reimbursement, "Obra Alpha", "01/12/2024", 55.0, Paid),
    ]
}

/// Movement records that are only reachable through the detail endpoints.
fn seed_movement_details() -> HashMap<String, Value> {
    HashMap::from([(
        "req_2025_000126".to_string(),
        json!({
            "id": "req_2025_000126",
            "registerDate": "2025-02-10T00:00:00-03:00",
            "grossValue": 87.4,
            "costCenterCode": "05.001",
        }),
    )])
}

fn next_request_id() -> String {
    let n: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    format!("req_{}_{}", Local::now().year(), n)
}

pub struct MockDatabase {
    cost_centers: Vec<CostCenter>,
    projects: Vec<Project>,
    expenses: Vec<(u32, ExpenseType)>,
    tasks: Vec<Task>,
    details: HashMap<String, Value>,
    requests: Mutex<Vec<RequestListItem>>,
    persistence: Box<dyn RequestPersistence>,
}

impl MockDatabase {
    /// Loads persisted requests, falling back to the seed list.
    pub fn new(persistence: impl RequestPersistence + 'static) -> Self {
        let requests = persistence
            .read()
            .and_then(|raw| match serde_json::from_str::<Vec<RequestListItem>>(&raw) {
                Ok(list) => Some(list),
                Err(e) => {
                    warn!("Ignoring unreadable mock database: {}", e);
                    None
                }
            })
            .unwrap_or_else(seed_requests);

        Self {
            cost_centers: seed_cost_centers(),
            projects: seed_projects(),
            expenses: seed_expenses(),
            tasks: seed_tasks(),
            details: seed_movement_details(),
            requests: Mutex::new(requests),
            persistence: Box::new(persistence),
        }
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<RequestListItem>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn list_requests(&self) -> Vec<RequestListItem> {
        self.lock_requests().clone()
    }

    pub fn expense_types(&self, project_id: Option<u32>) -> Vec<ExpenseType> {
        let mut out: Vec<ExpenseType> = Vec::new();
        for (project, expense) in &self.expenses {
            if project_id.is_some_and(|p| p != *project) {
                continue;
            }
            if !out.iter().any(|e| e.id == expense.id) {
                out.push(expense.clone());
            }
        }
        out
    }

    pub fn tasks(&self, project_id: u32) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect()
    }

    fn cost_center_label(&self, code: &str) -> String {
        self.cost_centers
            .iter()
            .find(|cc| cc.code == code)
            .map(|cc| cc.name.clone())
            .unwrap_or_else(|| code.to_string())
    }

    /// Records a movement as a new pending reimbursement, newest first.
    pub fn add_from_movement_payload(&self, payload: &Value) -> RequestListItem {
        let cost_center_code = payload
            .get("movementItems")
            .and_then(|items| items.get(0))
            .and_then(|item| item.get("costCenterApportionments"))
            .and_then(|apps| apps.get(0))
            .and_then(|app| pick_string(app, &["costCenterCode"]))
            .unwrap_or_else(|| DEFAULT_COST_CENTER.to_string());

        let item = RequestListItem {
            id: next_request_id(),
            request_type: RequestType::Reimbursement,
            cost_center: self.cost_center_label(&cost_center_code),
            date: pick_field(payload, &["registerDate"])
                .map(to_date_br)
                .unwrap_or_else(|| Local::now().format("%d/%m/%Y").to_string()),
            total: pick_field(payload, &["grossValue"])
                .map(|v| to_number(v, 0.0))
                .unwrap_or(0.0),
            status: RequestStatus::Pending,
        };

        let snapshot = {
            let mut requests = self.lock_requests();
            requests.insert(0, item.clone());
            requests.clone()
        };
        match serde_json::to_string(&snapshot) {
            Ok(raw) => self.persistence.write(&raw),
            Err(e) => warn!("Could not persist mock database: {}", e),
        }
        info!("Mock backend created request {}", item.id);
        item
    }

    fn movement_detail(&self, movement_id: &str) -> Option<Value> {
        if let Some(detail) = self.details.get(movement_id) {
            return Some(detail.clone());
        }
        self.lock_requests()
            .iter()
            .find(|r| r.id == movement_id)
            .map(|r| {
                json!({
                    "id": r.id,
                    "date": r.date,
                    "grossValue": r.total,
                    "costCenter": r.cost_center,
                })
            })
    }
}

fn query_value<'a>(query: &'a [(&str, String)], key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.as_str())
}

fn project_from_parameters(query: &[(&str, String)]) -> Option<u32> {
    query_value(query, PARAMETERS_KEY)?
        .strip_prefix("IDPRJ=")?
        .trim()
        .parse()
        .ok()
}

/// Movement id named by a detail path (`.../Movements/1|42` or `.../42`)
/// or by an `id eq ...` filter.
fn movement_id_from_request(path: &str, query: &[(&str, String)]) -> Option<String> {
    if let Some(rest) = path.strip_prefix(MOVEMENTS_PATH).and_then(|r| r.strip_prefix('/')) {
        let id = rest.rsplit('|').next().unwrap_or(rest);
        return Some(id.to_string());
    }
    let filter = query_value(query, FILTER_KEY)?;
    let id = filter.rsplit("id eq ").next()?.trim().trim_matches('\'');
    (!id.is_empty()).then(|| id.to_string())
}

/// Serves ERP paths from a [`MockDatabase`].
#[derive(Clone)]
pub struct MockBackend {
    db: Arc<MockDatabase>,
}

impl MockBackend {
    pub fn new(db: Arc<MockDatabase>) -> Self {
        Self { db }
    }

    fn not_found(method: &str, path: &str) -> ReembolsoError {
        ReembolsoError::NotFound {
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

#[async_trait]
impl ErpBackend for MockBackend {
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        debug!("Mock GET {} {:?}", path, query);
        let db = &self.db;

        if path.contains(Query::CostCenters.id()) {
            let rows: Vec<Value> = db
                .cost_centers
                .iter()
                .map(|cc| json!({ "CODCCUSTO": cc.code, "NOME": cc.name }))
                .collect();
            return Ok(Value::Array(rows));
        }
        if path.contains(Query::Projects.id()) {
            let rows: Vec<Value> = db
                .projects
                .iter()
                .map(|p| json!({ "IDPRJ": p.id, "NOMEPRJ": p.name }))
                .collect();
            return Ok(json!({ "data": rows }));
        }
        if path.contains(Query::ExpenseTypes.id()) {
            let expenses = db.expense_types(project_from_parameters(query));
            return Ok(serde_json::to_value(expenses)?);
        }
        if path.contains(Query::Tasks.id()) {
            let rows: Vec<Value> = project_from_parameters(query)
                .map(|p| db.tasks(p))
                .unwrap_or_default()
                .into_iter()
                .map(|t| json!({ "IDTRF": t.id, "NOMETAREFA": t.name, "IDPRJ": t.project_id }))
                .collect();
            return Ok(Value::Array(rows));
        }
        if path.contains(Query::UserRequests.id()) {
            return Ok(serde_json::to_value(db.list_requests())?);
        }
        if path.starts_with(MOVEMENTS_PATH) {
            return movement_id_from_request(path, query)
                .and_then(|id| db.movement_detail(&id))
                .ok_or_else(|| ReembolsoError::Api {
                    status: 404,
                    message: "Movimento não encontrado.".to_string(),
                });
        }

        Err(Self::not_found("GET", path))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        if path != MOVEMENTS_PATH {
            return Err(Self::not_found("POST", path));
        }

        let has_items = body
            .get("movementItems")
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty());
        if !has_items {
            return Err(ReembolsoError::Api {
                status: 400,
                message: "Nenhum item informado.".to_string(),
            });
        }

        let created = self.db.add_from_movement_payload(body);
        Ok(json!({ "ok": true, "created": created }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_requests::MemoryPersistence;

    fn backend() -> MockBackend {
        MockBackend::new(Arc::new(MockDatabase::new(MemoryPersistence::new())))
    }

    #[tokio::test]
    async fn test_serves_lookups_by_query_id() {
        let backend = backend();
        let centers = backend.get_json(&Query::CostCenters.path(), &[]).await.unwrap();
        assert_eq!(centers.as_array().unwrap().len(), 3);

        let expenses = backend
            .get_json(
                &Query::ExpenseTypes.path(),
                &[(PARAMETERS_KEY, "IDPRJ=3".to_string())],
            )
            .await
            .unwrap();
        assert!(expenses.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_without_items_is_rejected() {
        let err = backend()
            .post_json(MOVEMENTS_PATH, &json!({ "movementItems": [] }))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Nenhum item informado.");
    }

    #[tokio::test]
    async fn test_created_request_is_listed_first_and_persisted() {
        let persistence = Arc::new(MemoryPersistence::new());
        let db = Arc::new(MockDatabase::new(persistence.clone()));
        let backend = MockBackend::new(db.clone());

        let body = json!({
            "registerDate": "2025-03-01T00:00:00-03:00",
            "grossValue": 30.01,
            "movementItems": [{
                "costCenterApportionments": [{ "costCenterCode": "01.001" }]
            }]
        });
        let response = backend.post_json(MOVEMENTS_PATH, &body).await.unwrap();
        assert_eq!(response["ok"], true);

        let first = &db.list_requests()[0];
        assert!(first.id.starts_with("req_"));
        assert_eq!(first.cost_center, "TI & Inovação");
        assert_eq!(first.date, "01/03/2025");
        assert_eq!(first.total, 30.01);
        assert_eq!(first.status, RequestStatus::Pending);

        let reloaded = MockDatabase::new(persistence);
        assert_eq!(reloaded.list_requests()[0].id, first.id);
    }

    #[tokio::test]
    async fn test_movement_detail_paths() {
        let backend = backend();
        let detail = backend
            .get_json("/mov/v1/Movements/1|req_2025_000126", &[])
            .await
            .unwrap();
        assert_eq!(detail["grossValue"], 87.4);

        let by_filter = backend
            .get_json(
                MOVEMENTS_PATH,
                &[(FILTER_KEY, "id eq 'req_2025_000123'".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(by_filter["grossValue"], 116.0);
    }
}
