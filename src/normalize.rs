//! Normalization of ERP query responses.
//!
//! The consultation endpoints do not agree on an envelope or on column names,
//! so every read goes through these helpers before it becomes a typed model.

use crate::schema::{
    CostCenter, ExpenseType, Project, RequestListItem, RequestStatus, RequestType, Task,
    UNKNOWN_DATE, UNKNOWN_TOTAL,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::debug;
use serde_json::Value;

/// Envelope keys probed for a row array, highest priority first.
pub const ENVELOPE_KEYS: &[&str] = &[
    "data", "items", "value", "result", "results", "rows", "records", "content",
];

type RowExtractor = fn(&Value) -> Option<Vec<Value>>;

/// Tried in order; the first extractor that recognizes the shape wins.
const ROW_EXTRACTORS: &[RowExtractor] = &[bare_array, envelope_array, single_array_field];

fn bare_array(response: &Value) -> Option<Vec<Value>> {
    response.as_array().cloned()
}

fn envelope_array(response: &Value) -> Option<Vec<Value>> {
    let obj = response.as_object()?;
    ENVELOPE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array).cloned())
}

fn single_array_field(response: &Value) -> Option<Vec<Value>> {
    let obj = response.as_object()?;
    let mut arrays = obj.values().filter_map(Value::as_array);
    let first = arrays.next()?;
    if arrays.next().is_some() {
        return None;
    }
    Some(first.clone())
}

/// Pulls the record array out of an arbitrarily wrapped response.
pub fn extract_rows(response: &Value) -> Vec<Value> {
    ROW_EXTRACTORS
        .iter()
        .find_map(|extract| extract(response))
        .unwrap_or_default()
}

/// Fields whose presence marks an object as a record rather than an envelope.
const RECORD_ID_KEYS: &[&str] = &["id", "IDMOV", "idMov", "movementId"];

/// Single record out of a detail response: first row of an array, the object
/// itself when it carries a record id, otherwise the first row of a known
/// envelope. A movement carries its own `items` array, so the id wins.
pub fn extract_record(response: &Value) -> Option<Value> {
    let record = match response {
        Value::Array(rows) => rows.first().cloned(),
        Value::Object(obj) if obj.is_empty() => None,
        Value::Object(_) if pick_field(response, RECORD_ID_KEYS).is_some() => {
            Some(response.clone())
        }
        Value::Object(_) => match envelope_array(response) {
            Some(rows) => rows.into_iter().next(),
            None => Some(response.clone()),
        },
        _ => None,
    }?;
    record.is_object().then_some(record)
}

/// Lowercases and strips everything but letters and digits.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Returns the first candidate field that is present and not null or blank.
///
/// A second pass compares normalized key names so `codCCusto`, `COD_CCUSTO`
/// and `codccusto` all match each other.
pub fn pick_field<'a>(record: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    let obj = record.as_object()?;

    let exact = candidates
        .iter()
        .find_map(|key| obj.get(*key).filter(|v| has_content(v)));
    if exact.is_some() {
        return exact;
    }

    candidates.iter().find_map(|candidate| {
        let wanted = normalize_key(candidate);
        obj.iter()
            .find(|(key, value)| normalize_key(key) == wanted && has_content(value))
            .map(|(_, value)| value)
    })
}

/// Text form of a scalar value; `None` for null, blank strings and containers.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn pick_string(record: &Value, candidates: &[&str]) -> Option<String> {
    pick_field(record, candidates).and_then(value_as_text)
}

/// Positive integer id, accepting numbers and numeric strings.
pub fn pick_id(record: &Value, candidates: &[&str]) -> Option<u32> {
    let value = pick_field(record, candidates)?;
    let n = to_number(value, f64::NAN);
    (n.is_finite() && n > 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64).then_some(n as u32)
}

/// Parses a locale-ambiguous decimal string.
///
/// Currency symbols and letters are dropped. With both `,` and `.` present the
/// one appearing last is the decimal separator; a lone `,` is a decimal comma.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Numeric coercion with a caller-supplied fallback.
pub fn to_number(value: &Value, fallback: f64) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(fallback),
        Value::String(s) => parse_decimal(s).unwrap_or(fallback),
        _ => fallback,
    }
}

fn is_br_date(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            2 | 5 => *b == b'/',
            _ => b.is_ascii_digit(),
        })
}

fn parse_generic_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    None
}

/// Formats a raw date as `dd/mm/yyyy`.
///
/// Already formatted values pass through, unparseable ones are returned as-is
/// and an empty value becomes the `"-"` placeholder.
pub fn format_date_br(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return UNKNOWN_DATE.to_string();
    }
    if is_br_date(raw) {
        return raw.to_string();
    }
    parse_generic_date(raw)
        .map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| raw.to_string())
}

pub fn to_date_br(value: &Value) -> String {
    value_as_text(value)
        .map(|raw| format_date_br(&raw))
        .unwrap_or_else(|| UNKNOWN_DATE.to_string())
}

const TYPE_FIELDS: &[&str] = &[
    "type", "tipo", "TIPO", "SERIE", "serie", "series", "CODTMV", "HISTORICO",
];

const STATUS_FIELDS: &[&str] = &["status", "STATUS", "STATUSMOV", "situacao", "SITUACAO"];

fn scan_fields(record: &Value, fields: &[&str]) -> Vec<String> {
    fields
        .iter()
        .filter_map(|field| record.get(*field).and_then(value_as_text))
        .map(|text| text.to_lowercase())
        .collect()
}

/// Advance when a type-ish field mentions "adi", reimbursement otherwise.
pub fn infer_type(record: &Value) -> RequestType {
    for text in scan_fields(record, TYPE_FIELDS) {
        if text.contains("adi") {
            return RequestType::Advance;
        }
        if text.contains("reem") {
            return RequestType::Reimbursement;
        }
    }
    RequestType::Reimbursement
}

pub fn infer_status(record: &Value) -> RequestStatus {
    let text = scan_fields(record, STATUS_FIELDS).join(" ");
    if text.contains("pago") || text.contains("quit") {
        RequestStatus::Paid
    } else if text.contains("em aprov") || text.contains("pend") {
        RequestStatus::Pending
    } else if text.contains("aprov") {
        RequestStatus::Approved
    } else {
        RequestStatus::Pending
    }
}

const COST_CENTER_CODE: &[&str] = &["code", "CODCCUSTO", "codCCusto", "CODIGO", "codigo"];
const COST_CENTER_NAME: &[&str] = &["name", "NOME", "nome", "DESCRICAO", "descricao"];

const PROJECT_ID: &[&str] = &["id", "IDPRJ", "idPrj", "IDPROJETO", "ID"];
const PROJECT_NAME: &[&str] = &["name", "NOMEPRJ", "NOME", "DESCRICAO", "descricao"];

const EXPENSE_ID: &[&str] = &["id", "IDDESPESA", "CODDESPESA", "IDPRD", "ID"];
const EXPENSE_NAME: &[&str] = &["name", "NOME", "DESCRICAO", "NOMEFANTASIA", "descricao"];
const EXPENSE_TASK: &[&str] = &["taskId", "IDTRF", "IDTAREFA", "idTarefa"];

const TASK_ID: &[&str] = &["id", "IDTRF", "IDTAREFA", "ID"];
const TASK_NAME: &[&str] = &["name", "NOMETAREFA", "NOME", "DESCRICAO"];
const TASK_PROJECT: &[&str] = &["projectId", "IDPRJ", "idPrj"];

const REQUEST_ID: &[&str] = &["id", "IDMOV", "idMov", "movementId", "NUMEROMOV"];
const REQUEST_COST_CENTER: &[&str] = &[
    "costCenter",
    "NOMECCUSTO",
    "CODCCUSTO",
    "centroCusto",
    "costCenterCode",
];
const REQUEST_DATE: &[&str] = &[
    "date",
    "DATAEMISSAO",
    "DATAMOVIMENTO",
    "registerDate",
    "DATACRIACAO",
];
const REQUEST_TOTAL: &[&str] = &["total", "VALORBRUTO", "VALORLIQUIDO", "grossValue", "netValue"];

pub fn map_cost_centers(rows: &[Value]) -> Vec<CostCenter> {
    rows.iter()
        .filter_map(|row| {
            let Some(code) = pick_string(row, COST_CENTER_CODE) else {
                debug!("Skipping cost center row without code: {}", row);
                return None;
            };
            let name = pick_string(row, COST_CENTER_NAME).unwrap_or_else(|| code.clone());
            Some(CostCenter { code, name })
        })
        .collect()
}

pub fn map_projects(rows: &[Value]) -> Vec<Project> {
    rows.iter()
        .filter_map(|row| {
            let Some(id) = pick_id(row, PROJECT_ID) else {
                debug!("Skipping project row without id: {}", row);
                return None;
            };
            let name = pick_string(row, PROJECT_NAME).unwrap_or_else(|| id.to_string());
            Some(Project { id, name })
        })
        .collect()
}

pub fn map_expense_types(rows: &[Value]) -> Vec<ExpenseType> {
    rows.iter()
        .filter_map(|row| {
            let Some(id) = pick_id(row, EXPENSE_ID) else {
                debug!("Skipping expense row without id: {}", row);
                return None;
            };
            Some(ExpenseType {
                id,
                name: pick_string(row, EXPENSE_NAME).unwrap_or_else(|| id.to_string()),
                task_id: pick_id(row, EXPENSE_TASK),
            })
        })
        .collect()
}

/// Maps task rows; rows that do not name their project inherit `project_id`.
pub fn map_tasks(rows: &[Value], project_id: u32) -> Vec<Task> {
    rows.iter()
        .filter_map(|row| {
            let Some(id) = pick_id(row, TASK_ID) else {
                debug!("Skipping task row without id: {}", row);
                return None;
            };
            Some(Task {
                id,
                name: pick_string(row, TASK_NAME).unwrap_or_else(|| id.to_string()),
                project_id: pick_id(row, TASK_PROJECT).unwrap_or(project_id),
            })
        })
        .collect()
}

pub fn map_request_row(row: &Value) -> Option<RequestListItem> {
    let id = pick_string(row, REQUEST_ID)?;
    let total = pick_field(row, REQUEST_TOTAL)
        .map(|v| to_number(v, UNKNOWN_TOTAL))
        .unwrap_or(UNKNOWN_TOTAL)
        .max(0.0);

    Some(RequestListItem {
        id,
        request_type: infer_type(row),
        cost_center: pick_string(row, REQUEST_COST_CENTER).unwrap_or_default(),
        date: pick_field(row, REQUEST_DATE)
            .map(to_date_br)
            .unwrap_or_else(|| UNKNOWN_DATE.to_string()),
        total,
        status: infer_status(row),
    })
}

pub fn map_request_rows(rows: &[Value]) -> Vec<RequestListItem> {
    rows.iter()
        .filter_map(|row| {
            let item = map_request_row(row);
            if item.is_none() {
                debug!("Skipping request row without id: {}", row);
            }
            item
        })
        .collect()
}
