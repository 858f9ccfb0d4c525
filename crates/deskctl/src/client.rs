//! HTTP client for communicating with deskd.

use anyhow::{anyhow, Context, Result};
use desk_common::{
    CompanyBinding, Identity, Month, QuotaStatus, SupportPlan, COMPANY_HEADER, USER_HEADER,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Error body returned by the daemon
#[derive(Debug, Deserialize)]
pub struct DaemonError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub allow_override: bool,
    #[serde(default)]
    pub show_add_bundle_prompt: bool,
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for DaemonError {}

/// Client for communicating with deskd
pub struct DeskClient {
    http: reqwest::Client,
    base: String,
    identity: Option<Identity>,
}

impl DeskClient {
    pub fn new(server: &str, identity: Option<Identity>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base: server.trim_end_matches('/').to_string(),
            identity,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, self.url(path));
        if let Some(id) = &self.identity {
            req = req
                .header(COMPANY_HEADER, &id.company)
                .header(USER_HEADER, &id.user);
        }
        req
    }

    fn require_identity(&self) -> Result<()> {
        if self.identity.is_none() {
            return Err(anyhow!(
                "This command needs an identity.\n\
                 Pass --as-company and --as-user, or set DESKCTL_COMPANY and DESKCTL_USER."
            ));
        }
        Ok(())
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = req.send().await.with_context(|| {
            format!(
                "Cannot connect to desk daemon at {}.\n\
                 Is deskd running? Try: sudo systemctl status deskd",
                self.base
            )
        })?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<DaemonError>(&body) {
                Ok(err) => err.into(),
                Err(_) => anyhow!("HTTP {}: {}", status, body),
            });
        }
        serde_json::from_str(&body).context("unexpected response from daemon")
    }

    pub async fn health(&self) -> Result<Value> {
        self.send(self.request(reqwest::Method::GET, "/v1/health")).await
    }

    /// Quota for `company`/`month`, or for the caller's own company this month.
    pub async fn quota(&self, company: Option<&str>, month: Option<Month>) -> Result<QuotaStatus> {
        let path = match (company, month) {
            (Some(c), Some(m)) => format!("/v1/quota/{}/{}", c, m),
            (Some(c), None) => format!("/v1/quota/{}", c),
            (None, _) => {
                self.require_identity()?;
                "/v1/quota".to_string()
            }
        };
        self.send(self.request(reqwest::Method::GET, &path)).await
    }

    pub async fn add_bundle(&self, company: &str, month: Month, tickets: u32) -> Result<Value> {
        let body = serde_json::json!({ "company": company, "month": month, "tickets": tickets });
        self.send(self.request(reqwest::Method::POST, "/v1/bundles").json(&body))
            .await
    }

    pub async fn purchase(&self, tickets: u32) -> Result<Value> {
        self.require_identity()?;
        let body = serde_json::json!({ "tickets": tickets });
        self.send(
            self.request(reqwest::Method::POST, "/v1/bundles/purchase")
                .json(&body),
        )
        .await
    }

    pub async fn plans(&self) -> Result<Vec<SupportPlan>> {
        self.send(self.request(reqwest::Method::GET, "/v1/plans")).await
    }

    pub async fn companies(&self) -> Result<Vec<CompanyBinding>> {
        self.send(self.request(reqwest::Method::GET, "/v1/companies"))
            .await
    }
}
