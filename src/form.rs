//! State of the "new reimbursement" form.
//!
//! Each line item walks project → expense type → task. Picking a project
//! triggers a fetch of that project's expense types; the expense type may
//! carry the task to use, in which case the task is filled in and locked.

use crate::api::client::ReembolsoApi;
use crate::config::MovementDefaults;
use crate::error::{ReembolsoError, Result};
use crate::local_requests::LocalRequests;
use crate::money::sum;
use crate::normalize::pick_string;
use crate::payload::build_movement_payload;
use crate::schema::{
    CostCenter, ExpenseType, Project, ReembolsoFormVM, ReembolsoItemVM, RequestListItem,
    RequestStatus, RequestType,
};
use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Expense types known for one project.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpenseLoad {
    Loading,
    Loaded(Vec<ExpenseType>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    NoProject,
    ExpensesLoading,
    ExpensesLoaded { empty: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormItem {
    pub project_id: Option<u32>,
    pub expense_type_id: Option<u32>,
    pub task_id: Option<u32>,
    /// Set when the task came from the expense type and cannot be edited.
    pub task_locked: bool,
    pub unit_price: f64,
}

impl FormItem {
    fn empty() -> Self {
        Self {
            project_id: None,
            expense_type_id: None,
            task_id: None,
            task_locked: false,
            unit_price: 0.0,
        }
    }
}

/// A receipt picked by the user. Only kept in memory, never uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct ReembolsoForm {
    cost_centers: Vec<CostCenter>,
    projects: Vec<Project>,
    cost_center_code: Option<String>,
    items: Vec<FormItem>,
    expenses: HashMap<u32, ExpenseLoad>,
    files: Vec<StagedFile>,
}

fn item_error(idx: usize, msg: &str) -> ReembolsoError {
    ReembolsoError::Validation(format!("Item {}: {}", idx + 1, msg))
}

impl ReembolsoForm {
    /// Starts with a single empty item.
    pub fn new(cost_centers: Vec<CostCenter>, projects: Vec<Project>) -> Self {
        Self {
            cost_centers,
            projects,
            cost_center_code: None,
            items: vec![FormItem::empty()],
            expenses: HashMap::new(),
            files: Vec::new(),
        }
    }

    pub fn cost_centers(&self) -> &[CostCenter] {
        &self.cost_centers
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn items(&self) -> &[FormItem] {
        &self.items
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn select_cost_center(&mut self, code: &str) -> Result<()> {
        if !self.cost_centers.iter().any(|cc| cc.code == code) {
            return Err(ReembolsoError::Validation(format!(
                "Centro de Custo {} não encontrado.",
                code
            )));
        }
        self.cost_center_code = Some(code.to_string());
        Ok(())
    }

    pub fn add_item(&mut self) -> usize {
        self.items.push(FormItem::empty());
        self.items.len() - 1
    }

    pub fn remove_item(&mut self, idx: usize) -> Result<()> {
        if idx >= self.items.len() {
            return Err(item_error(idx, "item inexistente."));
        }
        self.items.remove(idx);
        Ok(())
    }

    fn item_mut(&mut self, idx: usize) -> Result<&mut FormItem> {
        self.items
            .get_mut(idx)
            .ok_or_else(|| item_error(idx, "item inexistente."))
    }

    /// Expense types loaded for `project_id`, if the load has finished.
    pub fn expenses_for(&self, project_id: u32) -> Option<&[ExpenseType]> {
        match self.expenses.get(&project_id) {
            Some(ExpenseLoad::Loaded(list)) => Some(list),
            _ => None,
        }
    }

    /// Selects a project and clears the item's expense and task.
    ///
    /// Returns the project whose expense types must be fetched, or `None`
    /// when they are already loaded or a fetch is already in flight.
    pub fn select_project(&mut self, idx: usize, project_id: u32) -> Result<Option<u32>> {
        if !self.projects.iter().any(|p| p.id == project_id) {
            return Err(item_error(idx, "projeto não encontrado."));
        }
        let item = self.item_mut(idx)?;
        item.project_id = Some(project_id);
        item.expense_type_id = None;
        item.task_id = None;
        item.task_locked = false;

        match self.expenses.get(&project_id) {
            None => {
                self.expenses.insert(project_id, ExpenseLoad::Loading);
                Ok(Some(project_id))
            }
            Some(ExpenseLoad::Loading) => {
                debug!("Expense types for project {} already loading", project_id);
                Ok(None)
            }
            Some(ExpenseLoad::Loaded(_)) => {
                self.apply_expense_defaults(idx);
                Ok(None)
            }
        }
    }

    /// Stores a finished expense load and settles every item on that project.
    pub fn finish_expense_load(&mut self, project_id: u32, expenses: Vec<ExpenseType>) {
        debug!("Project {} has {} expense types", project_id, expenses.len());
        self.expenses.insert(project_id, ExpenseLoad::Loaded(expenses));
        for idx in 0..self.items.len() {
            if self.items[idx].project_id == Some(project_id) {
                self.apply_expense_defaults(idx);
            }
        }
    }

    /// Keeps a still-valid expense, otherwise falls back to the first one.
    fn apply_expense_defaults(&mut self, idx: usize) {
        let Some(project_id) = self.items[idx].project_id else {
            return;
        };
        let Some(list) = self.expenses_for(project_id) else {
            return;
        };
        let current = self.items[idx].expense_type_id;
        let chosen = match current {
            Some(id) if list.iter().any(|e| e.id == id) => Some(id),
            _ => list.first().map(|e| e.id),
        };
        self.items[idx].expense_type_id = chosen;
        self.sync_task(idx);
    }

    fn selected_expense(&self, idx: usize) -> Option<&ExpenseType> {
        let item = self.items.get(idx)?;
        let list = self.expenses_for(item.project_id?)?;
        let expense_id = item.expense_type_id?;
        list.iter().find(|e| e.id == expense_id)
    }

    fn sync_task(&mut self, idx: usize) {
        let suggested = self.selected_expense(idx).and_then(|e| e.task_id);
        let item = &mut self.items[idx];
        match suggested {
            Some(task_id) => {
                item.task_id = Some(task_id);
                item.task_locked = true;
            }
            None if item.task_locked => {
                item.task_id = None;
                item.task_locked = false;
            }
            None => {}
        }
    }

    pub fn select_expense(&mut self, idx: usize, expense_type_id: u32) -> Result<()> {
        let project_id = self
            .items
            .get(idx)
            .ok_or_else(|| item_error(idx, "item inexistente."))?
            .project_id
            .ok_or_else(|| item_error(idx, "selecione um Projeto."))?;
        let known = self
            .expenses_for(project_id)
            .is_some_and(|list| list.iter().any(|e| e.id == expense_type_id));
        if !known {
            return Err(item_error(idx, "tipo de despesa inválido para o projeto."));
        }
        self.items[idx].expense_type_id = Some(expense_type_id);
        self.sync_task(idx);
        Ok(())
    }

    /// Manual task entry, allowed only when the expense type suggests none.
    pub fn set_task(&mut self, idx: usize, task_id: u32) -> Result<()> {
        let item = self.item_mut(idx)?;
        if item.task_locked {
            return Err(item_error(idx, "a tarefa é definida pelo tipo de despesa."));
        }
        item.task_id = (task_id > 0).then_some(task_id);
        Ok(())
    }

    pub fn set_unit_price(&mut self, idx: usize, unit_price: f64) -> Result<()> {
        self.item_mut(idx)?.unit_price = unit_price;
        Ok(())
    }

    pub fn item_state(&self, idx: usize) -> Option<ItemState> {
        let item = self.items.get(idx)?;
        let state = match item.project_id {
            None => ItemState::NoProject,
            Some(project_id) => match self.expenses.get(&project_id) {
                Some(ExpenseLoad::Loaded(list)) => ItemState::ExpensesLoaded {
                    empty: list.is_empty(),
                },
                _ => ItemState::ExpensesLoading,
            },
        };
        Some(state)
    }

    /// Quantity is always 1, so a line total is its unit price.
    pub fn line_total(&self, idx: usize) -> f64 {
        self.items.get(idx).map(|i| i.unit_price).unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        let lines: Vec<f64> = (0..self.items.len()).map(|i| self.line_total(i)).collect();
        sum(&lines)
    }

    /// Why the form cannot be submitted right now, if anything blocks it.
    pub fn blocking_reason(&self) -> Option<String> {
        if self.items.is_empty() {
            return Some("Adicione ao menos 1 item.".to_string());
        }
        (0..self.items.len()).find_map(|idx| match self.item_state(idx) {
            Some(ItemState::ExpensesLoading) => Some(format!(
                "Item {}: aguarde o carregamento das despesas do projeto.",
                idx + 1
            )),
            Some(ItemState::ExpensesLoaded { empty: true }) => Some(format!(
                "Item {}: o projeto selecionado não possui despesas configuradas.",
                idx + 1
            )),
            _ => None,
        })
    }

    pub fn can_submit(&self) -> bool {
        self.blocking_reason().is_none()
    }

    pub fn stage_file(&mut self, path: &Path) -> Result<bool> {
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ReembolsoError::Validation(format!("Arquivo inválido: {}", path.display()))
            })?
            .to_string();

        if self.files.iter().any(|f| f.name == name && f.size == size) {
            debug!("Ignoring duplicate drop of {}", name);
            return Ok(false);
        }

        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        self.files.push(StagedFile {
            path: path.to_path_buf(),
            name,
            size,
            mime_type,
        });
        Ok(true)
    }

    /// Stages several files at once, returning how many were new.
    pub fn stage_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<usize> {
        let mut added = 0;
        for path in paths {
            if self.stage_file(path.as_ref())? {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn remove_file(&mut self, name: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.name != name);
        self.files.len() != before
    }

    pub fn to_view_model(&self) -> Result<ReembolsoFormVM> {
        if let Some(reason) = self.blocking_reason() {
            return Err(ReembolsoError::Validation(reason));
        }

        let cost_center_code = self.cost_center_code.clone().unwrap_or_default();
        let cost_center_name = self
            .cost_centers
            .iter()
            .find(|cc| cc.code == cost_center_code)
            .map(|cc| cc.name.clone())
            .unwrap_or_default();

        let items = self
            .items
            .iter()
            .enumerate()
            .map(|(idx, item)| ReembolsoItemVM {
                expense_type_id: item.expense_type_id,
                expense_name: self
                    .selected_expense(idx)
                    .map(|e| e.name.clone())
                    .unwrap_or_default(),
                project_id: item.project_id,
                project_name: item
                    .project_id
                    .and_then(|id| self.projects.iter().find(|p| p.id == id))
                    .map(|p| p.name.clone())
                    .unwrap_or_default(),
                task_id: item.task_id,
                quantity: 1.0,
                unit_price: item.unit_price,
            })
            .collect();

        Ok(ReembolsoFormVM {
            cost_center_code,
            cost_center_name,
            items,
        })
    }
}

/// Fetches the reference data the form needs and returns a fresh form.
pub async fn load_form(api: &ReembolsoApi) -> ReembolsoForm {
    let (cost_centers, projects) = futures::join!(api.get_cost_centers(), api.get_projects());
    ReembolsoForm::new(cost_centers, projects)
}

/// Selects a project on an item and, unless already loaded or loading,
/// fetches its expense types.
pub async fn select_project_and_load(
    form: &mut ReembolsoForm,
    api: &ReembolsoApi,
    idx: usize,
    project_id: u32,
) -> Result<()> {
    if let Some(project_id) = form.select_project(idx, project_id)? {
        let expenses = api.get_expense_types(Some(project_id)).await;
        form.finish_expense_load(project_id, expenses);
    }
    Ok(())
}

fn created_request_id(response: &Value) -> Option<String> {
    let created = response.get("created").unwrap_or(response);
    pick_string(created, &["id", "movementId", "IDMOV", "idMov"])
}

/// Validates, builds and posts the movement, then caches the new request so
/// the next list render shows it before the ERP does.
pub async fn submit(
    form: &ReembolsoForm,
    api: &ReembolsoApi,
    cache: &LocalRequests,
    defaults: &MovementDefaults,
    now: DateTime<FixedOffset>,
) -> Result<RequestListItem> {
    let vm = form.to_view_model()?;
    let payload = build_movement_payload(&vm, defaults, now)?;
    let response = api.save_movement(&payload).await?;

    let cost_center = if vm.cost_center_name.is_empty() {
        vm.cost_center_code.clone()
    } else {
        vm.cost_center_name.clone()
    };
    let item = RequestListItem {
        id: created_request_id(&response)
            .unwrap_or_else(|| format!("local_{}", now.timestamp_millis())),
        request_type: RequestType::Reimbursement,
        cost_center,
        date: now.format("%d/%m/%Y").to_string(),
        total: payload.gross_value,
        status: RequestStatus::Pending,
    };

    cache.add_at(item.clone(), now.with_timezone(&Utc));
    info!("Request {} submitted ({} files staged locally)", item.id, form.files.len());
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn form() -> ReembolsoForm {
        ReembolsoForm::new(
            vec![CostCenter {
                code: "05.001".into(),
                name: "Obra Alpha".into(),
            }],
            vec![
                Project { id: 1, name: "Obra Alpha".into() },
                Project { id: 3, name: "Projeto Beta".into() },
            ],
        )
    }

    fn expenses() -> Vec<ExpenseType> {
        vec![
            ExpenseType { id: 10, name: "Alimentação".into(), task_id: Some(301) },
            ExpenseType { id: 12, name: "Transporte".into(), task_id: None },
        ]
    }

    #[test]
    fn test_starts_with_one_empty_item() {
        let f = form();
        assert_eq!(f.items().len(), 1);
        assert_eq!(f.item_state(0), Some(ItemState::NoProject));
    }

    #[test]
    fn test_duplicate_project_fetch_is_suppressed() {
        let mut f = form();
        f.add_item();
        assert_eq!(f.select_project(0, 1).unwrap(), Some(1));
        assert_eq!(f.select_project(1, 1).unwrap(), None);
        assert_eq!(f.item_state(1), Some(ItemState::ExpensesLoading));
        assert!(!f.can_submit());
    }

    #[test]
    fn test_load_defaults_first_expense_and_locks_task() {
        let mut f = form();
        f.select_project(0, 1).unwrap();
        f.finish_expense_load(1, expenses());

        let item = &f.items()[0];
        assert_eq!(item.expense_type_id, Some(10));
        assert_eq!(item.task_id, Some(301));
        assert!(item.task_locked);
        assert!(f.set_task(0, 999).is_err());
    }

    #[test]
    fn test_expense_without_task_unlocks_manual_entry() {
        let mut f = form();
        f.select_project(0, 1).unwrap();
        f.finish_expense_load(1, expenses());
        f.select_expense(0, 12).unwrap();

        assert_eq!(f.items()[0].task_id, None);
        assert!(!f.items()[0].task_locked);
        f.set_task(0, 555).unwrap();
        assert_eq!(f.items()[0].task_id, Some(555));
    }

    #[test]
    fn test_reselecting_project_resets_dependents() {
        let mut f = form();
        f.select_project(0, 1).unwrap();
        f.finish_expense_load(1, expenses());
        f.select_expense(0, 12).unwrap();
        f.set_task(0, 555).unwrap();

        // Already loaded: no new fetch, defaults re-applied.
        assert_eq!(f.select_project(0, 1).unwrap(), None);
        assert_eq!(f.items()[0].expense_type_id, Some(10));
        assert_eq!(f.items()[0].task_id, Some(301));
    }

    #[test]
    fn test_project_without_expenses_blocks_submit() {
        let mut f = form();
        f.select_project(0, 3).unwrap();
        f.finish_expense_load(3, vec![]);

        assert_eq!(f.item_state(0), Some(ItemState::ExpensesLoaded { empty: true }));
        let reason = f.blocking_reason().unwrap();
        assert!(reason.starts_with("Item 1:"), "{}", reason);
        assert!(f.to_view_model().is_err());
    }

    #[test]
    fn test_expense_from_other_project_rejected() {
        let mut f = form();
        f.select_project(0, 1).unwrap();
        f.finish_expense_load(1, expenses());
        assert!(f.select_expense(0, 99).is_err());
        assert!(f.select_project(0, 42).is_err());
    }

    #[test]
    fn test_view_model_and_totals() {
        let mut f = form();
        f.select_cost_center("05.001").unwrap();
        f.select_project(0, 1).unwrap();
        f.finish_expense_load(1, expenses());
        f.set_unit_price(0, 10.005).unwrap();
        let second = f.add_item();
        f.select_project(second, 1).unwrap();
        f.set_unit_price(second, 20.0).unwrap();

        assert_eq!(f.total(), 30.01);
        let vm = f.to_view_model().unwrap();
        assert_eq!(vm.cost_center_name, "Obra Alpha");
        assert_eq!(vm.items.len(), 2);
        assert_eq!(vm.items[1].expense_name, "Alimentação");
        assert_eq!(vm.items[1].project_name, "Obra Alpha");
        assert!(vm.items.iter().all(|i| i.quantity == 1.0));
    }

    #[test]
    fn test_file_staging() {
        let dir = tempfile::tempdir().unwrap();
        let receipt = dir.path().join("nota.pdf");
        std::fs::File::create(&receipt)
            .unwrap()
            .write_all(b"%PDF-1.4")
            .unwrap();
        let photo = dir.path().join("taxi.jpg");
        std::fs::write(&photo, b"jpg").unwrap();

        let mut f = form();
        assert_eq!(f.stage_files(&[&receipt, &photo, &receipt]).unwrap(), 2);
        assert_eq!(f.files()[0].mime_type, "application/pdf");
        assert_eq!(f.files()[1].mime_type, "image/jpeg");
        assert_eq!(f.files()[0].size, 8);

        assert!(f.remove_file("nota.pdf"));
        assert_eq!(f.files().len(), 1);
        assert!(f.stage_file(&dir.path().join("missing.png")).is_err());
    }
}
