//! The "my requests" page: loading, filtering, sorting and rendering.

use crate::api::client::ReembolsoApi;
use crate::hydrate::hydrate;
use crate::local_requests::LocalRequests;
use crate::money::format_brl;
use crate::schema::{RequestListItem, RequestStatus, RequestType};
use chrono::NaiveDate;
use log::{info, warn};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::str::FromStr;

pub const LOAD_FAILED_MESSAGE: &str =
    "Não foi possível carregar as solicitações. Tente novamente mais tarde.";
pub const EMPTY_LIST_MESSAGE: &str = "Nenhuma solicitação encontrada.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(RequestType),
}

impl TypeFilter {
    pub fn matches(&self, item: &RequestListItem) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(t) => item.request_type == *t,
        }
    }
}

impl FromStr for TypeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todos" | "all" => Ok(TypeFilter::All),
            "reembolso" | "reimbursement" => Ok(TypeFilter::Only(RequestType::Reimbursement)),
            "adiantamento" | "advance" => Ok(TypeFilter::Only(RequestType::Advance)),
            other => Err(format!("unknown request type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Id,
    Date,
    Total,
    Status,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "id" => Ok(SortKey::Id),
            "date" | "data" => Ok(SortKey::Date),
            "total" => Ok(SortKey::Total),
            "status" => Ok(SortKey::Status),
            other => Err(format!("unknown sort key '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: TypeFilter,
    pub search: Option<String>,
    pub sort: Option<SortKey>,
    pub descending: bool,
}

/// Loaded list plus the message to show when the backend could not be read.
#[derive(Debug, Clone, Default)]
pub struct RequestList {
    pub items: Vec<RequestListItem>,
    pub error: Option<String>,
}

/// Prepends cached requests the backend does not know about yet.
pub fn merge_with_local(
    local: Vec<RequestListItem>,
    remote: Vec<RequestListItem>,
) -> Vec<RequestListItem> {
    let known: HashSet<&str> = remote.iter().map(|item| item.id.as_str()).collect();
    let mut merged: Vec<RequestListItem> = local
        .into_iter()
        .filter(|item| !known.contains(item.id.as_str()))
        .collect();
    merged.extend(remote);
    merged
}

pub async fn load_request_list(
    api: &ReembolsoApi,
    cache: &LocalRequests,
    user_code: &str,
    company_id: u32,
    concurrency: usize,
) -> RequestList {
    let fetch = api.fetch_user_requests(user_code).await;
    let error = if fetch.all_failed() {
        warn!("Every request listing attempt failed for user {}", user_code);
        Some(LOAD_FAILED_MESSAGE.to_string())
    } else {
        None
    };

    let remote = hydrate(api.backend(), fetch.items, company_id, concurrency).await;
    let items = merge_with_local(cache.list(), remote);
    info!("Request list has {} entries", items.len());

    RequestList { items, error }
}

fn parse_br_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%d/%m/%Y").ok()
}

fn status_rank(status: RequestStatus) -> u8 {
    match status {
        RequestStatus::Pending => 0,
        RequestStatus::Approved => 1,
        RequestStatus::Paid => 2,
    }
}

fn compare(a: &RequestListItem, b: &RequestListItem, key: SortKey, descending: bool) -> Ordering {
    let directed = |ord: Ordering| if descending { ord.reverse() } else { ord };
    match key {
        SortKey::Id => directed(a.id.cmp(&b.id)),
        SortKey::Total => directed(a.total.total_cmp(&b.total)),
        SortKey::Status => directed(status_rank(a.status).cmp(&status_rank(b.status))),
        // Unparseable dates go last whichever the direction.
        SortKey::Date => match (parse_br_date(&a.date), parse_br_date(&b.date)) {
            (Some(x), Some(y)) => directed(x.cmp(&y)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

pub fn apply_query(items: &[RequestListItem], query: &ListQuery) -> Vec<RequestListItem> {
    let needle = query
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut out: Vec<RequestListItem> = items
        .iter()
        .filter(|item| query.filter.matches(item))
        .filter(|item| match &needle {
            Some(n) => {
                item.id.to_lowercase().contains(n) || item.cost_center.to_lowercase().contains(n)
            }
            None => true,
        })
        .cloned()
        .collect();

    if let Some(key) = query.sort {
        out.sort_by(|a, b| compare(a, b, key, query.descending));
    }
    out
}

pub fn find_request<'a>(items: &'a [RequestListItem], id: &str) -> Option<&'a RequestListItem> {
    let id = id.trim();
    items.iter().find(|item| item.id == id)
}

/// Detail view of a single request, one labelled field per line.
pub fn render_detail(item: &RequestListItem) -> String {
    format!(
        "ID: {}\nTipo: {}\nCentro de custo: {}\nData: {}\nTotal: {}\nStatus: {}\n",
        item.id,
        item.request_type.label(),
        item.cost_center,
        item.date,
        format_brl(item.total),
        item.status.label()
    )
}

const HEADERS: [&str; 6] = ["Nº", "Tipo", "Centro de Custo", "Data", "Total", "Status"];

pub fn render_table(items: &[RequestListItem]) -> String {
    if items.is_empty() {
        return format!("{}\n", EMPTY_LIST_MESSAGE);
    }

    let rows: Vec<[String; 6]> = items
        .iter()
        .map(|item| {
            [
                item.id.clone(),
                item.request_type.label().to_string(),
                item.cost_center.clone(),
                item.date.clone(),
                format_brl(item.total),
                item.status.label().to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |cells: [&str; 6]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(col, (cell, w))| {
                let pad = " ".repeat(w - cell.chars().count());
                // Totals are right-aligned.
                if col == 4 {
                    format!("{}{}", pad, cell)
                } else {
                    format!("{}{}", cell, pad)
                }
            })
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    let mut out = String::new();
    out.push_str(&line(HEADERS));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    out.push('\n');
    for row in &rows {
        out.push_str(&line(row.each_ref().map(String::as_str)));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(
        id: &str,
        t: RequestType,
        cc: &str,
        date: &str,
        total: f64,
        s: RequestStatus,
    ) -> RequestListItem {
        RequestListItem {
            id: id.to_string(),
            request_type: t,
            cost_center: cc.to_string(),
            date: date.to_string(),
            total,
            status: s,
        }
    }

    fn sample() -> Vec<RequestListItem> {
        use RequestStatus::*;
        use RequestType::*;
        vec![
            item("req_3", Reimbursement, "Obra Alpha", "10/02/2025", 50.0, Paid),
            item("req_1", Advance, "TI & Inovação", "-", 1500.0, Pending),
            item("req_2", Reimbursement, "Administrativo", "05/01/2025", 87.4, Approved),
        ]
    }

    fn ids(items: &[RequestListItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_filter_by_type() {
        let query = ListQuery {
            filter: "Adiantamento".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(ids(&apply_query(&sample(), &query)), vec!["req_1"]);
        assert!("outro".parse::<TypeFilter>().is_err());
    }

    #[test]
    fn test_search_matches_id_and_cost_center() {
        let mut query = ListQuery {
            search: Some("alpha".into()),
            ..Default::default()
        };
        assert_eq!(ids(&apply_query(&sample(), &query)), vec!["req_3"]);

        query.search = Some("REQ_2".into());
        assert_eq!(ids(&apply_query(&sample(), &query)), vec!["req_2"]);

        query.search = Some("   ".into());
        assert_eq!(apply_query(&sample(), &query).len(), 3);
    }

    #[test]
    fn test_date_sort_puts_unknown_last_both_ways() {
        let mut query = ListQuery {
            sort: Some(SortKey::Date),
            ..Default::default()
        };
        assert_eq!(ids(&apply_query(&sample(), &query)), vec!["req_2", "req_3", "req_1"]);

        query.descending = true;
        assert_eq!(ids(&apply_query(&sample(), &query)), vec!["req_3", "req_2", "req_1"]);
    }

    #[test]
    fn test_sort_by_total_and_status() {
        let query = ListQuery {
            sort: Some(SortKey::Total),
            descending: true,
            ..Default::default()
        };
        assert_eq!(ids(&apply_query(&sample(), &query)), vec!["req_1", "req_2", "req_3"]);

        let query = ListQuery {
            sort: Some("status".parse().unwrap()),
            ..Default::default()
        };
        assert_eq!(ids(&apply_query(&sample(), &query)), vec!["req_1", "req_2", "req_3"]);
    }

    #[test]
    fn test_merge_puts_unknown_local_items_first() {
        let remote = sample();
        let local = vec![
            item(
                "req_new",
                RequestType::Reimbursement,
                "Obra Alpha",
                "01/03/2025",
                10.0,
                RequestStatus::Pending,
            ),
            item("req_2", RequestType::Reimbursement, "stale", "-", 0.0, RequestStatus::Pending),
        ];
        let merged = merge_with_local(local, remote);
        assert_eq!(ids(&merged), vec!["req_new", "req_3", "req_1", "req_2"]);
        assert_eq!(merged[3].cost_center, "Administrativo");
    }

    #[test]
    fn test_render_table() {
        let table = render_table(&sample());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("Nº"));
        assert!(lines[2].contains("R$ 50,00"));
        assert!(lines[3].contains("R$ 1.500,00"));
        assert!(lines[3].contains("Em Aprovação"));

        assert_eq!(render_table(&[]), format!("{}\n", EMPTY_LIST_MESSAGE));
    }

    #[test]
    fn test_find_and_render_detail() {
        let items = sample();
        let found = find_request(&items, " req_1 ").unwrap();
        assert_eq!(
            render_detail(found),
            "ID: req_1\nTipo: Adiantamento\nCentro de custo: TI & Inovação\n\
             Data: -\nTotal: R$ 1.500,00\nStatus: Em Aprovação\n"
        );
        assert!(find_request(&items, "req_9").is_none());
    }
}
