use std::time::Duration;

use log::{debug, info};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::{Credential, Repository};
use crate::error::{ApiError, ExporterError};

use super::api::{GithubApi, RunnerScope};
use super::auth::Authenticator;
use super::endpoint::RemoteEndpoint;
use super::models::{
    Runner, RunnersPage, Workflow, WorkflowRun, WorkflowRunUsage, WorkflowRunsPage, WorkflowUsage,
    WorkflowsPage,
};

const PAGE_SIZE: u32 = 100;
const API_VERSION: &str = "2022-11-28";

/// Authenticated REST client.
///
/// Built once at startup and shared read-only by every fetcher.
/// `reqwest::Client` pools connections internally.
pub struct GithubClient {
    http: reqwest::Client,
    endpoint: RemoteEndpoint,
    auth: Authenticator,
}

impl GithubClient {
    /// Client factory.
    ///
    /// Resolves the API root, loads the credential and prepares the
    /// HTTP transport. Nothing is sent over the network here.
    ///
    /// ERRORS:
    /// - malformed Enterprise URL -> `Configuration`
    /// - unreadable / invalid app key -> `Authentication`
    pub fn new(
        credential: &Credential,
        api_url: &str,
        timeout: Duration,
    ) -> Result<Self, ExporterError> {
        let endpoint = RemoteEndpoint::resolve(api_url)?;

        match credential {
            Credential::Token(_) => info!("authenticating with token"),
            Credential::AppInstallation { app_id, .. } => {
                info!("authenticating as app {app_id}")
            }
        }
        let auth = Authenticator::from_credential(credential, &endpoint)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            HeaderName::from_static("x-github-api-version"),
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                "github-actions-exporter/",
                env!("CARGO_PKG_VERSION")
            )),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ExporterError::Authentication(format!("http client: {e}")))?;

        if endpoint.is_enterprise() {
            info!("using enterprise api root {}", endpoint.root());
        }

        Ok(Self {
            http,
            endpoint,
            auth,
        })
    }

    #[cfg(test)]
    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.endpoint.join(path))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let token = self.auth.bearer(&self.http).await?;
        let resp = self.http.get(url.clone()).bearer_auth(token).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                url: url.to_string(),
            });
        }

        Ok(resp.json().await?)
    }

    /// Walks `page=1..` until `total_count` items are collected or a
    /// page comes back empty.
    async fn get_all<P, T>(
        &self,
        path: &str,
        split: impl Fn(P) -> (u64, Vec<T>),
    ) -> Result<Vec<T>, ApiError>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let url = self.url(
                path,
                &[("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())],
            )?;
            let (total, batch) = split(self.get::<P>(url).await?);
            let empty = batch.is_empty();
            items.extend(batch);

            if empty || items.len() as u64 >= total {
                break;
            }
            page += 1;
        }

        debug!("{path}: {} items over {page} page(s)", items.len());
        Ok(items)
    }
}

#[async_trait::async_trait]
impl GithubApi for GithubClient {
    async fn list_runners(
        &self,
        scope: RunnerScope,
        target: &str,
    ) -> Result<Vec<Runner>, ApiError> {
        self.get_all(&scope.runners_path(target), |p: RunnersPage| {
            (p.total_count, p.runners)
        })
        .await
    }

    async fn list_workflows(&self, repo: &Repository) -> Result<Vec<Workflow>, ApiError> {
        self.get_all(&format!("repos/{repo}/actions/workflows"), |p: WorkflowsPage| {
            (p.total_count, p.workflows)
        })
        .await
    }

    async fn workflow_usage(
        &self,
        repo: &Repository,
        workflow_id: i64,
    ) -> Result<WorkflowUsage, ApiError> {
        let url = self.url(
            &format!("repos/{repo}/actions/workflows/{workflow_id}/timing"),
            &[],
        )?;
        self.get(url).await
    }

    async fn list_workflow_runs(
        &self,
        repo: &Repository,
        per_page: u32,
    ) -> Result<Vec<WorkflowRun>, ApiError> {
        let url = self.url(
            &format!("repos/{repo}/actions/runs"),
            &[("per_page", per_page.to_string())],
        )?;
        let page: WorkflowRunsPage = self.get(url).await?;
        Ok(page.workflow_runs)
    }

    async fn workflow_run_usage(
        &self,
        repo: &Repository,
        run_id: i64,
    ) -> Result<WorkflowRunUsage, ApiError> {
        let url = self.url(&format!("repos/{repo}/actions/runs/{run_id}/timing"), &[])?;
        self.get(url).await
    }
}
