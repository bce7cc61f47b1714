use crate::api::backend::ErpBackend;
use crate::api::endpoints::{project_filter, Query, MOVEMENTS_PATH, PARAMETERS_KEY};
use crate::error::Result;
use crate::normalize::{
    extract_rows, map_cost_centers, map_expense_types, map_projects, map_request_rows, map_tasks,
};
use crate::payload::MovementPayload;
use crate::schema::{CostCenter, ExpenseType, Project, RequestListItem, Task};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Filter column names the user-requests consultation has been seen to accept.
const USER_FILTER_COLUMNS: &[&str] = &["CODUSUARIO", "USUARIO", "CODCFO", "CODCLIFOR", "CODVEN"];

/// Ordered filter expressions tried when listing a user's requests.
///
/// Each column is tried quoted and unquoted; the last attempt carries no
/// filter at all.
pub fn user_request_filters(user_code: &str) -> Vec<Option<String>> {
    let mut filters: Vec<Option<String>> = USER_FILTER_COLUMNS
        .iter()
        .flat_map(|column| {
            [
                Some(format!("{}='{}'", column, user_code)),
                Some(format!("{}={}", column, user_code)),
            ]
        })
        .collect();
    filters.push(None);
    filters
}

/// Merges attempt results: on an id collision the later batch wins, and the
/// output keeps the order in which ids were first seen.
pub fn merge_by_id(batches: Vec<Vec<RequestListItem>>) -> Vec<RequestListItem> {
    let mut merged: Vec<RequestListItem> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for item in batches.into_iter().flatten() {
        match positions.get(&item.id) {
            Some(&idx) => merged[idx] = item,
            None => {
                positions.insert(item.id.clone(), merged.len());
                merged.push(item);
            }
        }
    }

    merged
}

/// Result of the multi-attempt request listing.
#[derive(Debug, Clone, Default)]
pub struct RequestFetch {
    pub items: Vec<RequestListItem>,
    pub attempts: usize,
    pub failures: usize,
}

impl RequestFetch {
    pub fn all_failed(&self) -> bool {
        self.attempts > 0 && self.failures == self.attempts
    }
}

/// Typed access to the reimbursement endpoints over any [`ErpBackend`].
#[derive(Clone)]
pub struct ReembolsoApi {
    backend: Arc<dyn ErpBackend>,
}

impl ReembolsoApi {
    pub fn new(backend: Arc<dyn ErpBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn ErpBackend {
        self.backend.as_ref()
    }

    pub async fn query_rows(&self, query: Query, parameters: Option<&str>) -> Result<Vec<Value>> {
        let params: Vec<(&str, String)> = parameters
            .map(|p| vec![(PARAMETERS_KEY, p.to_string())])
            .unwrap_or_default();
        let response = self.backend.get_json(&query.path(), &params).await?;
        Ok(extract_rows(&response))
    }

    /// Lookup reads never fail: errors are logged and read as "no rows".
    async fn lookup_rows(&self, query: Query, parameters: Option<&str>) -> Vec<Value> {
        match self.query_rows(query, parameters).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Lookup {} failed: {}", query.id(), e);
                Vec::new()
            }
        }
    }

    pub async fn get_cost_centers(&self) -> Vec<CostCenter> {
        map_cost_centers(&self.lookup_rows(Query::CostCenters, None).await)
    }

    pub async fn get_projects(&self) -> Vec<Project> {
        map_projects(&self.lookup_rows(Query::Projects, None).await)
    }

    /// Expense types, restricted to a project when one is given.
    pub async fn get_expense_types(&self, project_id: Option<u32>) -> Vec<ExpenseType> {
        let filter = project_id.map(project_filter);
        map_expense_types(&self.lookup_rows(Query::ExpenseTypes, filter.as_deref()).await)
    }

    pub async fn get_tasks(&self, project_id: u32) -> Vec<Task> {
        let filter = project_filter(project_id);
        let rows = self.lookup_rows(Query::Tasks, Some(&filter)).await;
        map_tasks(&rows, project_id)
    }

    /// Lists a user's requests without knowing which filter column the
    /// consultation expects.
    ///
    /// Every filter from [`user_request_filters`] is tried in sequence; failed
    /// attempts count as empty and never stop the sequence.
    pub async fn fetch_user_requests(&self, user_code: &str) -> RequestFetch {
        let filters = user_request_filters(user_code);
        let mut batches = Vec::with_capacity(filters.len());
        let mut failures = 0;

        for filter in &filters {
            match self.query_rows(Query::UserRequests, filter.as_deref()).await {
                Ok(rows) => {
                    let items = map_request_rows(&rows);
                    debug!(
                        "Request listing with filter {:?} returned {} rows",
                        filter,
                        items.len()
                    );
                    if !items.is_empty() {
                        batches.push(items);
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!("Request listing with filter {:?} failed: {}", filter, e);
                }
            }
        }

        let items = merge_by_id(batches);
        info!(
            "Fetched {} requests for user {} ({} of {} attempts failed)",
            items.len(),
            user_code,
            failures,
            filters.len()
        );

        RequestFetch {
            items,
            attempts: filters.len(),
            failures,
        }
    }

    pub async fn save_movement(&self, payload: &MovementPayload) -> Result<Value> {
        let body = serde_json::to_value(payload)?;
        info!(
            "Submitting movement with {} items, total {:.2}",
            payload.movement_items.len(),
            payload.gross_value
        );
        self.backend.post_json(MOVEMENTS_PATH, &body).await
    }
}
