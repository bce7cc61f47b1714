use crate::error::{ReembolsoError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_API_BASE_URL: &str = "REEMBOLSO_API_BASE_URL";
pub const ENV_API_USER: &str = "REEMBOLSO_API_USER";
pub const ENV_API_PASSWORD: &str = "REEMBOLSO_API_PASSWORD";
pub const ENV_USER_CODE: &str = "REEMBOLSO_USER_CODE";
pub const ENV_USE_MOCKS: &str = "REEMBOLSO_USE_MOCKS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "web".to_string(),
            password: String::new(),
        }
    }
}

impl AuthConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Fixed movement fields the ERP requires but the form never asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementDefaults {
    pub company_id: u32,
    pub branch_id: u32,

    pub series: String,
    pub movement_type_code: String,
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
    pub cash_account_company_id: u32,
    pub cash_account_code: String,

    pub application_integration: String,
    pub net_value_currency_code: String,

    pub product_id: u32,

    pub budget_nature_company_id: u32,
    pub budget_nature_code: String,
}

impl Default for MovementDefaults {
    fn default() -> Self {
        Self {
            company_id: 1,
            branch_id: 1,
            series: "REEM".to_string(),
            movement_type_code: "1.1.01".to_string(),
            movement_kind: "A".to_string(),
            status: "A".to_string(),
            warehouse_code: "01.001".to_string(),
            destiny_warehouse_code: "01.001".to_string(),
            destiny_branch_id: 1,
            customer_vendor_company_id: 1,
            customer_vendor_code: "00060".to_string(),
            aux_customer_vendor_company_id: 1,
            aux_customer_vendor_code: "00060".to_string(),
            payment_term_code: "00030".to_string(),
            cash_account_company_id: 1,
            cash_account_code: "04".to_string(),
            application_integration: "T".to_string(),
            net_value_currency_code: "R$".to_string(),
            product_id: 15914,
            budget_nature_company_id: 0,
            budget_nature_code: "3.01.01.01".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL every ERP path is appended to, e.g. `http://erp:8051/api`.
    pub api_base_url: String,
    pub default_user_code: String,
    /// Serve every call from the in-process mock backend.
    pub use_mocks: bool,
    /// Maximum number of movement detail fetches in flight while hydrating.
    pub hydrate_concurrency: usize,
    pub request_timeout_secs: u64,
    /// Where just-submitted requests are cached; platform data dir when unset.
    pub cache_path: Option<PathBuf>,
    pub auth: AuthConfig,
    pub movement_defaults: MovementDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8051/api".to_string(),
            default_user_code: "00060".to_string(),
            use_mocks: false,
            hydrate_concurrency: 4,
            request_timeout_secs: 30,
            cache_path: None,
            auth: AuthConfig::default(),
            movement_defaults: MovementDefaults::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(raw).map_err(|e| ReembolsoError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the TOML file when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies `REEMBOLSO_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_BASE_URL) {
            self.api_base_url = url;
        }
        if let Some(user) = lookup(ENV_API_USER) {
            self.auth.username = user;
        }
        if let Some(password) = lookup(ENV_API_PASSWORD) {
            self.auth.password = password;
        }
        if let Some(code) = lookup(ENV_USER_CODE) {
            self.default_user_code = code;
        }
        if let Some(flag) = lookup(ENV_USE_MOCKS) {
            self.use_mocks = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.use_mocks && !self.api_base_url.starts_with("http") {
            return Err(ReembolsoError::ConfigError(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            )));
        }
        if self.hydrate_concurrency == 0 {
            return Err(ReembolsoError::ConfigError(
                "hydrate_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolved_cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("reembolso")
                .join("local-requests.json")
        })
    }
}
