use crate::api::backend::ErpBackend;
use crate::api::endpoints::{composite_movement_path, movement_path, FILTER_KEY, MOVEMENTS_PATH};
use crate::normalize::{extract_record, pick_field, pick_string, to_date_br, to_number};
use crate::schema::{RequestListItem, UNKNOWN_DATE};
use futures::stream::{self, StreamExt};
use log::{debug, info};
use serde_json::Value;

const DETAIL_DATE: &[&str] = &[
    "registerDate",
    "date",
    "DATAEMISSAO",
    "dataEmissao",
    "DATAMOVIMENTO",
];
const DETAIL_TOTAL: &[&str] = &["grossValue", "netValue", "VALORBRUTO", "VALORLIQUIDO", "total"];
const DETAIL_COST_CENTER: &[&str] = &["costCenterCode", "CODCCUSTO", "costCenter", "NOMECCUSTO"];

fn filter_literal(movement_id: &str) -> String {
    if movement_id.chars().all(|c| c.is_ascii_digit()) {
        movement_id.to_string()
    } else {
        format!("'{}'", movement_id.replace('\'', "''"))
    }
}

/// Detail lookups in the order they are tried: composite key, plain id,
/// company + id filter, id-only filter.
fn detail_lookups(company_id: u32, movement_id: &str) -> Vec<(String, Option<String>)> {
    let literal = filter_literal(movement_id);
    vec![
        (composite_movement_path(company_id, movement_id), None),
        (movement_path(movement_id), None),
        (
            MOVEMENTS_PATH.to_string(),
            Some(format!("companyId eq {} and id eq {}", company_id, literal)),
        ),
        (MOVEMENTS_PATH.to_string(), Some(format!("id eq {}", literal))),
    ]
}

/// First movement record any lookup yields; `None` when all of them miss.
pub async fn fetch_movement_detail(
    backend: &dyn ErpBackend,
    company_id: u32,
    movement_id: &str,
) -> Option<Value> {
    for (path, filter) in detail_lookups(company_id, movement_id) {
        let query: Vec<(&str, String)> = filter
            .map(|f| vec![(FILTER_KEY, f)])
            .unwrap_or_default();
        match backend.get_json(&path, &query).await {
            Ok(response) => {
                if let Some(record) = extract_record(&response) {
                    return Some(record);
                }
            }
            Err(e) => debug!("Movement lookup {} {:?} failed: {}", path, query, e),
        }
    }
    None
}

/// Cost center of the first apportionment of the first item.
fn apportionment_cost_center(detail: &Value) -> Option<String> {
    let item = pick_field(detail, &["movementItems", "items"])?
        .as_array()?
        .first()?;
    let apportionment = pick_field(item, &["costCenterApportionments"])?
        .as_array()?
        .first()?;
    pick_string(apportionment, &["costCenterCode", "CODCCUSTO"])
}

/// Fills only the placeholder fields of `item` from a movement record.
pub fn backfill(item: &mut RequestListItem, detail: &Value) {
    if item.is_missing_date() {
        if let Some(date) = pick_field(detail, DETAIL_DATE).map(to_date_br) {
            if date != UNKNOWN_DATE {
                item.date = date;
            }
        }
    }
    if item.is_missing_total() {
        let total = pick_field(detail, DETAIL_TOTAL)
            .map(|v| to_number(v, 0.0))
            .unwrap_or(0.0);
        if total > 0.0 {
            item.total = total;
        }
    }
    if item.is_missing_cost_center() {
        if let Some(cc) =
            pick_string(detail, DETAIL_COST_CENTER).or_else(|| apportionment_cost_center(detail))
        {
            item.cost_center = cc;
        }
    }
}

/// Completes list rows that still carry placeholder date, total or cost
/// center by fetching their movement records.
///
/// At most `concurrency` detail fetches are in flight. Output order matches
/// input order, and a failed fetch leaves its row as it was.
pub async fn hydrate(
    backend: &dyn ErpBackend,
    mut items: Vec<RequestListItem>,
    company_id: u32,
    concurrency: usize,
) -> Vec<RequestListItem> {
    let targets: Vec<(usize, String)> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.needs_hydration() && !item.id.trim().is_empty())
        .map(|(idx, item)| (idx, item.id.clone()))
        .collect();

    if targets.is_empty() {
        return items;
    }
    info!("Hydrating {} of {} requests", targets.len(), items.len());

    let details: Vec<(usize, Option<Value>)> = stream::iter(targets)
        .map(move |(idx, id)| async move {
            (idx, fetch_movement_detail(backend, company_id, &id).await)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (idx, detail) in details {
        match detail {
            Some(detail) => backfill(&mut items[idx], &detail),
            None => debug!("No movement record found for request {}", items[idx].id),
        }
    }

    items
}
