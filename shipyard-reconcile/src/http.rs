//! HTTP implementations of the upstream collaborators.
//!
//! Requests go through a blocking `ureq` agent on the blocking thread pool.
//! Each exchange is recorded in the work log like any other external
//! command: `command = [METHOD, url]`, exit code 0 on 2xx, the HTTP status
//! otherwise, and -1 when no response arrived.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use shipyard_exec::{CommandResult, WorkLog};

use crate::error::ReconcileError;
use crate::upstream::{ImageRegistry, RepoListing, RepoSource, RouteRegistry};

/// Answer to a request that reached the server, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
    /// Raw `Link` header, used for pagination.
    pub link: Option<String>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

struct Request {
    method: &'static str,
    url: String,
    headers: Vec<(&'static str, String)>,
    body: Option<Value>,
}

/// Shared agent plus the log every exchange is recorded in.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    log: WorkLog,
}

impl HttpClient {
    pub fn new(timeout: Duration, log: WorkLog) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("shipyard/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent, log }
    }

    async fn send(&self, request: Request) -> Result<HttpReply, ReconcileError> {
        let agent = self.agent.clone();
        let method = request.method;
        let url = request.url.clone();
        let started_at = Utc::now();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut call = agent.request(request.method, &request.url);
            for (name, value) in &request.headers {
                call = call.set(name, value);
            }
            let sent = match request.body {
                Some(body) => call.send_json(body),
                None => call.call(),
            };
            match sent {
                Ok(response) | Err(ureq::Error::Status(_, response)) => {
                    let status = response.status();
                    let link = response.header("link").map(str::to_string);
                    response
                        .into_string()
                        .map(|body| HttpReply { status, body, link })
                        .map_err(|err| err.to_string())
                }
                Err(ureq::Error::Transport(err)) => Err(err.to_string()),
            }
        })
        .await?;

        let (exit_code, output, stderr) = match &outcome {
            Ok(reply) if reply.is_success() => (0, reply.body.clone(), String::new()),
            Ok(reply) => (i32::from(reply.status), reply.body.clone(), String::new()),
            Err(message) => (-1, String::new(), message.clone()),
        };
        self.log.append(CommandResult {
            command: vec![method.to_string(), url.clone()],
            cwd: None,
            exit_code,
            output,
            stderr,
            started_at,
            ended_at: Utc::now(),
        });
        debug!(method, url = %url, exit_code, "http exchange");

        outcome.map_err(|message| ReconcileError::Http {
            method,
            url,
            message,
        })
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").finish_non_exhaustive()
    }
}

fn status_error(method: &'static str, url: &str, reply: &HttpReply) -> ReconcileError {
    ReconcileError::Http {
        method,
        url: url.to_string(),
        message: format!("status {}: {}", reply.status, reply.body.trim()),
    }
}

// ---------------------------------------------------------------------------
// Organization listing
// ---------------------------------------------------------------------------

/// Repositories of a GitHub organization.
#[derive(Debug, Clone)]
pub struct GithubOrg {
    client: HttpClient,
    api: String,
    org: String,
    token: Option<String>,
}

impl GithubOrg {
    pub fn new(
        client: HttpClient,
        api: impl Into<String>,
        org: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            api: api.into().trim_end_matches('/').to_string(),
            org: org.into(),
            token,
        }
    }
}

#[derive(Deserialize)]
struct GithubRepo {
    name: String,
    clone_url: String,
    owner: GithubOwner,
}

#[derive(Deserialize)]
struct GithubOwner {
    login: String,
}

pub(crate) fn parse_repo_listing(url: &str, body: &str) -> Result<Vec<RepoListing>, ReconcileError> {
    let repos: Vec<GithubRepo> =
        serde_json::from_str(body).map_err(|source| ReconcileError::Decode {
            url: url.to_string(),
            source,
        })?;
    Ok(repos
        .into_iter()
        .map(|repo| RepoListing::new(repo.name, repo.clone_url, repo.owner.login))
        .collect())
}

/// Upper bound on listing pages; a partial listing would remove services.
const MAX_LISTING_PAGES: usize = 100;

/// Target of the `rel="next"` entry in a `Link` header.
pub(crate) fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.trim().split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| matches!(param.trim(), "rel=\"next\"" | "rel=next"));
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        is_next.then(|| target.to_string())
    })
}

#[async_trait]
impl RepoSource for GithubOrg {
    async fn list_repositories(&self) -> Result<Vec<RepoListing>, ReconcileError> {
        let mut headers = vec![("Accept", "application/vnd.github+json".to_string())];
        if let Some(token) = &self.token {
            headers.push(("Authorization", format!("Bearer {token}")));
        }

        let mut repos = Vec::new();
        let mut next = Some(format!("{}/orgs/{}/repos?per_page=100", self.api, self.org));
        let mut pages = 0;
        while let Some(url) = next.take() {
            if pages == MAX_LISTING_PAGES {
                return Err(ReconcileError::Http {
                    method: "GET",
                    url,
                    message: format!("listing exceeds {MAX_LISTING_PAGES} pages"),
                });
            }
            pages += 1;
            let reply = self
                .client
                .send(Request {
                    method: "GET",
                    url: url.clone(),
                    headers: headers.clone(),
                    body: None,
                })
                .await?;
            if !reply.is_success() {
                return Err(status_error("GET", &url, &reply));
            }
            repos.extend(parse_repo_listing(&url, &reply.body)?);
            next = reply.link.as_deref().and_then(next_link);
        }
        info!(org = %self.org, repositories = repos.len(), pages, "fetched repository listing");
        Ok(repos)
    }
}

// ---------------------------------------------------------------------------
// Image registry
// ---------------------------------------------------------------------------

/// Docker registry HTTP API v2 with basic authentication.
#[derive(Clone)]
pub struct ContainerRegistry {
    client: HttpClient,
    host: String,
    authorization: String,
}

impl ContainerRegistry {
    pub fn new(client: HttpClient, host: impl Into<String>, user: &str, password: &str) -> Self {
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        Self {
            client,
            host: host.into(),
            authorization: format!("Basic {credentials}"),
        }
    }
}

impl std::fmt::Debug for ContainerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRegistry")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct RegistryErrors {
    #[serde(default)]
    errors: Vec<RegistryErrorEntry>,
}

#[derive(Deserialize)]
struct RegistryErrorEntry {
    code: String,
}

/// Error codes meaning "this tag has never been pushed". `NAME_UNKNOWN` is
/// what registries answer before the first push to a repository.
const ABSENT_CODES: [&str; 2] = ["MANIFEST_UNKNOWN", "NAME_UNKNOWN"];

pub(crate) fn manifest_presence(url: &str, reply: &HttpReply) -> Result<bool, ReconcileError> {
    if reply.is_success() {
        return Ok(true);
    }
    let absent = serde_json::from_str::<RegistryErrors>(&reply.body)
        .ok()
        .and_then(|parsed| parsed.errors.into_iter().next())
        .is_some_and(|first| ABSENT_CODES.contains(&first.code.as_str()));
    if absent {
        Ok(false)
    } else {
        Err(status_error("GET", url, reply))
    }
}

#[async_trait]
impl ImageRegistry for ContainerRegistry {
    async fn manifest_exists(&self, repository: &str, tag: &str) -> Result<bool, ReconcileError> {
        let url = format!("https://{}/v2/{repository}/manifests/{tag}", self.host);
        let reply = self
            .client
            .send(Request {
                method: "GET",
                url: url.clone(),
                headers: vec![
                    ("Authorization", self.authorization.clone()),
                    (
                        "Accept",
                        "application/vnd.docker.distribution.manifest.v2+json".to_string(),
                    ),
                ],
                body: None,
            })
            .await?;
        manifest_presence(&url, &reply)
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Ambassador-style route service: one route per service name.
#[derive(Debug, Clone)]
pub struct RouteService {
    client: HttpClient,
    base: String,
}

impl RouteService {
    pub fn new(client: HttpClient, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, service: &str) -> String {
        format!("{}/ambassador/service/{service}", self.base)
    }
}

#[derive(Deserialize)]
struct RouteLookup {
    #[serde(default)]
    ok: bool,
}

pub(crate) fn route_presence(url: &str, reply: &HttpReply) -> Result<bool, ReconcileError> {
    if reply.status == 404 {
        return Ok(false);
    }
    if !reply.is_success() {
        return Err(status_error("GET", url, reply));
    }
    let lookup: RouteLookup =
        serde_json::from_str(&reply.body).map_err(|source| ReconcileError::Decode {
            url: url.to_string(),
            source,
        })?;
    Ok(lookup.ok)
}

/// `/<prefix>/`, however many slashes the descriptor used.
pub(crate) fn route_prefix_path(prefix: &str) -> String {
    format!("/{}/", prefix.trim_matches('/'))
}

#[async_trait]
impl RouteRegistry for RouteService {
    async fn route_exists(&self, service: &str) -> Result<bool, ReconcileError> {
        let url = self.url(service);
        let reply = self
            .client
            .send(Request {
                method: "GET",
                url: url.clone(),
                headers: Vec::new(),
                body: None,
            })
            .await?;
        route_presence(&url, &reply)
    }

    async fn create_route(&self, service: &str, prefix: &str) -> Result<(), ReconcileError> {
        let url = self.url(service);
        let reply = self
            .client
            .send(Request {
                method: "POST",
                url: url.clone(),
                headers: Vec::new(),
                body: Some(serde_json::json!({ "prefix": route_prefix_path(prefix) })),
            })
            .await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(status_error("POST", &url, &reply))
        }
    }
}
