//! # Reembolso Client
//!
//! A client for filing expense-reimbursement requests against an ERP that
//! exposes generic SQL consultations and a movements API.
//!
//! ## Core Concepts
//!
//! - **Lookups**: Cost centers, projects, expense types and tasks come from
//!   named consultations whose response shapes vary; [`normalize`] maps them
//!   onto typed records
//! - **Request list**: A user's requests are fetched with several filter
//!   guesses, merged by id, completed from movement details ([`hydrate`]) and
//!   merged with requests submitted from this machine ([`local_requests`])
//! - **Submission**: The form ([`form`]) produces a draft that [`payload`]
//!   turns into the nested movement body the ERP expects
//! - **Mocks**: With `use_mocks` set, every call is served by an in-process
//!   [`mock::MockDatabase`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use reembolso_client::*;
//!
//! let app = ReembolsoApp::from_config(AppConfig::load(None)?)?;
//!
//! let mut form = app.new_form().await;
//! form.select_cost_center("05.001")?;
//! app.select_project(&mut form, 0, 1).await?;
//! form.set_unit_price(0, 45.90)?;
//! let created = app.submit(&form).await?;
//!
//! let list = app.load_requests().await;
//! print!("{}", render_table(&list.items));
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod form;
pub mod hydrate;
pub mod list;
pub mod local_requests;
pub mod mock;
pub mod money;
pub mod normalize;
pub mod payload;
pub mod schema;

pub use api::{ErpBackend, HttpBackend, ReembolsoApi, RequestFetch};
pub use config::{AppConfig, AuthConfig, MovementDefaults};
pub use error::{ReembolsoError, Result};
pub use form::{ItemState, ReembolsoForm, StagedFile};
pub use list::{
    apply_query, find_request, render_detail, render_table, ListQuery, RequestList, SortKey,
    TypeFilter,
};
pub use local_requests::{JsonFilePersistence, LocalRequests, MemoryPersistence, RequestPersistence};
pub use mock::{MockBackend, MockDatabase};
pub use money::format_brl;
pub use payload::{build_movement_payload, MovementPayload};
pub use schema::*;

use chrono::Local;
use log::info;
use std::sync::Arc;

/// Wires configuration, backend and local cache together.
pub struct ReembolsoApp {
    config: AppConfig,
    api: ReembolsoApi,
    cache: LocalRequests,
    mock_db: Option<Arc<MockDatabase>>,
}

impl ReembolsoApp {
    /// Picks the mock or HTTP backend from `use_mocks` and opens the file
    /// backed request cache.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let cache_path = config.resolved_cache_path();
        let cache = LocalRequests::new(JsonFilePersistence::new(&cache_path));

        if config.use_mocks {
            let db = Arc::new(MockDatabase::new(JsonFilePersistence::new(
                cache_path.with_file_name("mock-db.json"),
            )));
            info!("Using in-process mock backend");
            return Ok(Self::with_mock(config, db, cache));
        }

        let backend = HttpBackend::from_config(&config)?;
        info!("Using ERP at {}", backend.base_url());
        Ok(Self::with_backend(config, Arc::new(backend), cache))
    }

    pub fn with_backend(
        config: AppConfig,
        backend: Arc<dyn ErpBackend>,
        cache: LocalRequests,
    ) -> Self {
        Self {
            config,
            api: ReembolsoApi::new(backend),
            cache,
            mock_db: None,
        }
    }

    pub fn with_mock(config: AppConfig, db: Arc<MockDatabase>, cache: LocalRequests) -> Self {
        let backend = Arc::new(MockBackend::new(db.clone()));
        Self {
            mock_db: Some(db),
            ..Self::with_backend(config, backend, cache)
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn api(&self) -> &ReembolsoApi {
        &self.api
    }

    pub fn cache(&self) -> &LocalRequests {
        &self.cache
    }

    pub fn mock_db(&self) -> Option<&Arc<MockDatabase>> {
        self.mock_db.as_ref()
    }

    pub async fn load_requests(&self) -> RequestList {
        self.load_requests_for(&self.config.default_user_code).await
    }

    pub async fn load_requests_for(&self, user_code: &str) -> RequestList {
        list::load_request_list(
            &self.api,
            &self.cache,
            user_code,
            self.config.movement_defaults.company_id,
            self.config.hydrate_concurrency,
        )
        .await
    }

    pub async fn new_form(&self) -> ReembolsoForm {
        form::load_form(&self.api).await
    }

    pub async fn select_project(
        &self,
        form: &mut ReembolsoForm,
        idx: usize,
        project_id: u32,
    ) -> Result<()> {
        form::select_project_and_load(form, &self.api, idx, project_id).await
    }

    pub async fn submit(&self, form: &ReembolsoForm) -> Result<RequestListItem> {
        form::submit(
            form,
            &self.api,
            &self.cache,
            &self.config.movement_defaults,
            Local::now().fixed_offset(),
        )
        .await
    }
}
