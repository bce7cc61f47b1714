//! Movement-creation payload for the ERP `POST /mov/v1/Movements` endpoint.

use crate::config::MovementDefaults;
use crate::error::{ReembolsoError, Result};
use crate::money::{round2, sum};
use crate::schema::ReembolsoFormVM;
use chrono::{DateTime, FixedOffset, Local};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostCenterApportionment {
    pub company_id: u32,
    pub movement_item_sequential_id: u32,
    pub cost_center_code: String,
    pub percentage: f64,
    pub project_id: u32,
    pub task_id: u32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementItem {
    pub company_id: u32,
    pub sequential_id: u32,
    pub sequential_number: u32,
    pub product_id: u32,
    pub quantity: f64,
    pub unit_price: f64,
    pub register_date: String,
    pub warehouse_code: String,
    // The ERP schema spells "budget" this way.
    #[serde(rename = "bugdetNatureCompanyId")]
    pub budget_nature_company_id: u32,
    #[serde(rename = "bugdetNatureCode")]
    pub budget_nature_code: String,
    pub cost_center_apportionments: Vec<CostCenterApportionment>,
    pub department_apportionments: Vec<Value>,
    pub movement_item_taxes: Vec<Value>,
    pub batch_items: Vec<Value>,
    pub serial_numbers: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementPayload {
    pub company_id: u32,
    pub branch_id: u32,
    pub series: String,
    pub movement_type_code: String,
    #[serde(rename = "type")]
    pub movement_kind: String,
    pub status: String,
    pub warehouse_code: String,
    pub destiny_warehouse_code: String,
    pub destiny_branch_id: u32,
    pub customer_vendor_company_id: u32,
    pub customer_vendor_code: String,
    pub aux_customer_vendor_company_id: u32,
    pub aux_customer_vendor_code: String,
    pub payment_term_code: String,
    pub cash_account_code: String,
    pub cash_account_company_id: u32,
    #[serde(rename = "aplicationIntegration")]
    pub application_integration: String,
    pub net_value_currency_code: String,
    pub register_date: String,
    pub date: String,
    pub gross_value: f64,
    pub net_value: f64,
    pub other_values: f64,
    pub movement_items: Vec<MovementItem>,
}

/// Local midnight of `now`'s calendar day with its UTC offset,
/// e.g. `2025-01-15T00:00:00-03:00`.
pub fn local_midnight_timestamp(now: &DateTime<FixedOffset>) -> String {
    format!("{}T00:00:00{}", now.format("%Y-%m-%d"), now.format("%:z"))
}

/// Checks the draft, reporting the first problem with a 1-based item index.
pub fn validate_form(vm: &ReembolsoFormVM) -> Result<()> {
    let fail = |msg: String| Err(ReembolsoError::Validation(msg));

    if vm.cost_center_code.trim().is_empty() {
        return fail("Selecione um Centro de Custo.".to_string());
    }
    if vm.items.is_empty() {
        return fail("Adicione ao menos 1 item.".to_string());
    }

    for (idx, item) in vm.items.iter().enumerate() {
        let n = idx + 1;
        if !(item.quantity > 0.0) {
            return fail(format!("Item {}: quantidade inválida.", n));
        }
        if !(item.unit_price > 0.0) {
            return fail(format!("Item {}: informe um valor maior que 0.", n));
        }
        if !item.project_id.is_some_and(|id| id > 0) {
            return fail(format!("Item {}: selecione um Projeto.", n));
        }
        if !item.task_id.is_some_and(|id| id > 0) {
            return fail(format!("Item {}: selecione/defina uma Tarefa.", n));
        }
    }

    Ok(())
}

/// Builds the nested movement body for a validated draft.
///
/// Deterministic for a given draft, defaults and `now`: one timestamp is used
/// for the request and for every item, and each item gets a single 100%
/// apportionment to the request's cost center.
pub fn build_movement_payload(
    vm: &ReembolsoFormVM,
    defaults: &MovementDefaults,
    now: DateTime<FixedOffset>,
) -> Result<MovementPayload> {
    validate_form(vm)?;

    let subtotals: Vec<f64> = vm
        .items
        .iter()
        .map(|item| item.quantity * item.unit_price)
        .collect();
    let total = sum(&subtotals);
    let timestamp = local_midnight_timestamp(&now);

    let movement_items = vm
        .items
        .iter()
        .zip(&subtotals)
        .enumerate()
        .map(|(idx, (item, subtotal))| {
            let seq = idx as u32 + 1;
            MovementItem {
                company_id: defaults.company_id,
                sequential_id: seq,
                sequential_number: seq,
                product_id: defaults.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                register_date: timestamp.clone(),
                warehouse_code: defaults.warehouse_code.clone(),
                budget_nature_company_id: defaults.budget_nature_company_id,
                budget_nature_code: defaults.budget_nature_code.clone(),
                cost_center_apportionments: vec![CostCenterApportionment {
                    company_id: defaults.company_id,
                    movement_item_sequential_id: seq,
                    cost_center_code: vm.cost_center_code.clone(),
                    percentage: 100.0,
                    project_id: item.project_id.unwrap_or_default(),
                    task_id: item.task_id.unwrap_or_default(),
                    value: round2(*subtotal),
                }],
                department_apportionments: Vec::new(),
                movement_item_taxes: Vec::new(),
                batch_items: Vec::new(),
                serial_numbers: Vec::new(),
            }
        })
        .collect();

    Ok(MovementPayload {
        company_id: defaults.company_id,
        branch_id: defaults.branch_id,
        series: defaults.series.clone(),
        movement_type_code: defaults.movement_type_code.clone(),
        movement_kind: defaults.movement_kind.clone(),
        status: defaults.status.clone(),
        warehouse_code: defaults.warehouse_code.clone(),
        destiny_warehouse_code: defaults.destiny_warehouse_code.clone(),
        destiny_branch_id: defaults.destiny_branch_id,
        customer_vendor_company_id: defaults.customer_vendor_company_id,
        customer_vendor_code: defaults.customer_vendor_code.clone(),
        aux_customer_vendor_company_id: defaults.aux_customer_vendor_company_id,
        aux_customer_vendor_code: defaults.aux_customer_vendor_code.clone(),
        payment_term_code: defaults.payment_term_code.clone(),
        cash_account_code: defaults.cash_account_code.clone(),
        cash_account_company_id: defaults.cash_account_company_id,
        application_integration: defaults.application_integration.clone(),
        net_value_currency_code: defaults.net_value_currency_code.clone(),
        register_date: timestamp.clone(),
        date: timestamp,
        gross_value: total,
        net_value: total,
        other_values: total,
        movement_items,
    })
}

pub fn build_movement_payload_now(
    vm: &ReembolsoFormVM,
    defaults: &MovementDefaults,
) -> Result<MovementPayload> {
    build_movement_payload(vm, defaults, Local::now().fixed_offset())
}

pub fn movement_payload_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(MovementPayload)
}
