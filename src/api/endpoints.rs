//! Paths of the ERP endpoints used by the reimbursement flow.

pub const CONSULTA_BASE_PATH: &str = "/framework/v1/consultaSQLServer/RealizaConsulta";
pub const MOVEMENTS_PATH: &str = "/mov/v1/Movements";

/// Query-string key carrying the pseudo-SQL filter of a consultation.
pub const PARAMETERS_KEY: &str = "parameters";

/// Query-string key carrying the filter expression of a movement search.
pub const FILTER_KEY: &str = "filter";

/// Registered SQL consultations exposed by the ERP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    CostCenters,
    Projects,
    ExpenseTypes,
    UserRequests,
    Tasks,
}

impl Query {
    pub fn id(&self) -> &'static str {
        match self {
            Query::CostCenters => "ETH.REEM.001",
            Query::Projects => "ETH.REEM.002",
            Query::ExpenseTypes => "ETH.REEM.003",
            Query::UserRequests => "ETH.REEM.004",
            Query::Tasks => "ETH.REEM.005",
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}/0/T/", CONSULTA_BASE_PATH, self.id())
    }
}

pub fn project_filter(project_id: u32) -> String {
    format!("IDPRJ={}", project_id)
}

/// Direct lookup by the ERP's composite key `company|movement`.
pub fn composite_movement_path(company_id: u32, movement_id: &str) -> String {
    format!("{}/{}|{}", MOVEMENTS_PATH, company_id, movement_id)
}

pub fn movement_path(movement_id: &str) -> String {
    format!("{}/{}", MOVEMENTS_PATH, movement_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_paths() {
        assert_eq!(
            Query::UserRequests.path(),
            "/framework/v1/consultaSQLServer/RealizaConsulta/ETH.REEM.004/0/T/"
        );
        assert_eq!(Query::Tasks.id(), "ETH.REEM.005");
    }

    #[test]
    fn test_movement_paths() {
        assert_eq!(composite_movement_path(1, "123"), "/mov/v1/Movements/1|123");
        assert_eq!(movement_path("123"), "/mov/v1/Movements/123");
    }
}
