use crate::config::AppConfig;
use crate::error::{ReembolsoError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use std::time::Duration;

pub const GENERIC_READ_ERROR: &str = "Falha ao consultar o ERP.";
pub const GENERIC_SAVE_ERROR: &str = "Falha ao salvar a solicitação.";

/// Keys probed, in order, for a human readable message in an error body.
const ERROR_MESSAGE_KEYS: &[&str] = &["message", "Message", "detailedMessage", "DetailedMessage"];

/// Transport used by every ERP call. Paths are relative to the API base.
#[async_trait]
pub trait ErpBackend: Send + Sync {
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value>;

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value>;
}

/// Most specific message found in an ERP error body, if any.
pub fn extract_error_message(body: &Value) -> Option<String> {
    let from_object = |obj: &Value| {
        ERROR_MESSAGE_KEYS.iter().find_map(|key| {
            obj.get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    };

    match body {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(_) => from_object(body).or_else(|| body.get("error").and_then(from_object)),
        _ => None,
    }
}

/// Static HTTP Basic credential for every URL under `scope`.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    scope: String,
    header: HeaderValue,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str, scope: impl Into<String>) -> Result<Self> {
        let token = STANDARD.encode(format!("{}:{}", username, password));
        let header = HeaderValue::from_str(&format!("Basic {}", token))
            .map_err(|e| ReembolsoError::ConfigError(format!("Invalid credentials: {}", e)))?;
        Ok(Self {
            scope: scope.into(),
            header,
        })
    }

    pub fn applies_to(&self, url: &str) -> bool {
        url.starts_with(&self.scope)
    }

    /// Adds the header unless the URL is out of scope or one is already set.
    pub fn apply(&self, url: &str, headers: &mut HeaderMap) {
        if !self.applies_to(url) || headers.contains_key(AUTHORIZATION) {
            return;
        }
        headers.insert(AUTHORIZATION, self.header.clone());
    }
}

/// Base URL in the canonical form reqwest sends (lowercase host, no default
/// port), with a trailing `/`.
fn auth_scope(base_url: &str) -> Result<String> {
    let url = Url::parse(base_url).map_err(|e| {
        ReembolsoError::ConfigError(format!("Invalid API base URL '{}': {}", base_url, e))
    })?;
    Ok(format!("{}/", url.as_str().trim_end_matches('/')))
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    auth: Option<BasicAuth>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: None,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let backend = Self::new(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        if !config.auth.has_credentials() {
            debug!("No API credentials configured, sending requests without Authorization");
            return Ok(backend);
        }
        backend.with_basic_auth(&config.auth.username, &config.auth.password)
    }

    /// Authenticates every request sent under this backend's base URL.
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Result<Self> {
        let scope = auth_scope(&self.base_url)?;
        self.auth = Some(BasicAuth::new(username, password, scope)?);
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, builder: RequestBuilder, fallback_message: &str) -> Result<Value> {
        let mut request = builder.build()?;
        if let Some(auth) = &self.auth {
            let url = request.url().to_string();
            auth.apply(&url, request.headers_mut());
        }
        debug!("{} {}", request.method(), request.url());

        let res = self.client.execute(request).await?;
        let status = res.status();
        let text = res.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            return Err(ReembolsoError::Api {
                status: status.as_u16(),
                message: extract_error_message(&body)
                    .unwrap_or_else(|| fallback_message.to_string()),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl ErpBackend for HttpBackend {
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let builder = self.client.get(self.url(path)).query(query);
        self.send(builder, GENERIC_READ_ERROR).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let builder = self.client.post(self.url(path)).json(body);
        self.send(builder, GENERIC_SAVE_ERROR).await
    }
}
