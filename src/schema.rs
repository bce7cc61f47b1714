use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Date placeholder for a request whose date is not known yet.
pub const UNKNOWN_DATE: &str = "-";

/// Total placeholder for a request whose total is not known yet.
pub const UNKNOWN_TOTAL: f64 = 0.0;

/// Cost center placeholder shown by listings that have not resolved it.
pub const UNKNOWN_COST_CENTER: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CostCenter {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseType {
    pub id: u32,
    pub name: String,
    /// Task the backend suggests for this expense category. When absent the
    /// user has to type one in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u32,
    pub name: String,
    pub project_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum RequestType {
    #[serde(rename = "Reembolso")]
    Reimbursement,
    #[serde(rename = "Adiantamento")]
    Advance,
}

impl RequestType {
    pub fn label(&self) -> &'static str {
        match self {
            RequestType::Reimbursement => "Reembolso",
            RequestType::Advance => "Adiantamento",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum RequestStatus {
    #[serde(rename = "Em Aprovação")]
    Pending,
    #[serde(rename = "Aprovado")]
    Approved,
    #[serde(rename = "Pago")]
    Paid,
}

impl RequestStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "Em Aprovação",
            RequestStatus::Approved => "Aprovado",
            RequestStatus::Paid => "Pago",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the "my requests" list.
///
/// `date`, `total` and `cost_center` use placeholder values (`"-"`, `0`, empty)
/// while they are unknown; the hydrator only touches rows carrying them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestListItem {
    pub id: String,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub cost_center: String,
    pub date: String,
    pub total: f64,
    pub status: RequestStatus,
}

impl RequestListItem {
    pub fn is_missing_date(&self) -> bool {
        let date = self.date.trim();
        date.is_empty() || date == UNKNOWN_DATE
    }

    pub fn is_missing_total(&self) -> bool {
        !self.total.is_finite() || self.total == UNKNOWN_TOTAL
    }

    pub fn is_missing_cost_center(&self) -> bool {
        let cc = self.cost_center.trim();
        cc.is_empty() || cc == UNKNOWN_COST_CENTER
    }

    /// True when any field still holds its "not yet known" placeholder.
    pub fn needs_hydration(&self) -> bool {
        self.is_missing_date() || self.is_missing_total() || self.is_missing_cost_center()
    }
}

/// Draft line item of a reimbursement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReembolsoItemVM {
    pub expense_type_id: Option<u32>,
    pub expense_name: String,
    pub project_id: Option<u32>,
    pub project_name: String,
    pub task_id: Option<u32>,
    /// Always 1: each item carries a single unit price.
    pub quantity: f64,
    pub unit_price: f64,
}

/// Draft reimbursement request as filled in by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReembolsoFormVM {
    pub cost_center_code: String,
    pub cost_center_name: String,
    pub items: Vec<ReembolsoItemVM>,
}
