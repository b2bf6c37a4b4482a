//! In-memory doubles for every external system the reconciler touches.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use shipyard_core::{Service, ServiceName, ServiceRegistry};
use shipyard_exec::{CommandRunner, CommandSpec, ProcessExecutor, ProcessOutput, Scheduler, WorkLog};
use shipyard_reconcile::{
    Collaborators, ImageRegistry, Reconciler, ReconcileError, RegistryTarget, RepoListing,
    RepoSource, RouteRegistry,
};

pub const REGISTRY_HOST: &str = "registry.test";
pub const NAMESPACE: &str = "sandbox";
pub const PASSWORD: &str = "hunter2";

pub fn clone_url(name: &str) -> String {
    format!("https://git.test/acme/{name}.git")
}

pub fn image(container: &str, tag: &str) -> String {
    format!("{REGISTRY_HOST}/{NAMESPACE}/{container}:{tag}")
}

// ---------------------------------------------------------------------------
// Process host: git, docker, kubectl and the render script
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RepoFixture {
    pub revision: String,
    pub files: Vec<(String, String)>,
}

#[derive(Default)]
pub struct FakeHost {
    repos: Mutex<HashMap<String, RepoFixture>>,
    failing: Mutex<Vec<String>>,
    published: Arc<Mutex<HashSet<String>>>,
}

impl FakeHost {
    pub fn set_repo(&self, name: &str, revision: &str, files: &[(&str, &str)]) {
        let fixture = RepoFixture {
            revision: revision.to_string(),
            files: files
                .iter()
                .map(|(path, body)| (path.to_string(), body.to_string()))
                .collect(),
        };
        self.repos.lock().expect("repos").insert(name.to_string(), fixture);
    }

    pub fn set_revision(&self, name: &str, revision: &str) {
        if let Some(fixture) = self.repos.lock().expect("repos").get_mut(name) {
            fixture.revision = revision.to_string();
        }
    }

    /// Every command whose command line starts with `prefix` exits 1.
    pub fn fail(&self, prefix: &str) {
        self.failing.lock().expect("failing").push(prefix.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().expect("failing").clear();
    }

    fn clone_into(&self, url: &str, target: &Path) -> ProcessOutput {
        let repos = self.repos.lock().expect("repos");
        let Some(fixture) = repos.iter().find(|(name, _)| clone_url(name) == url).map(|(_, f)| f)
        else {
            return ProcessOutput::failure(128, format!("fatal: repository '{url}' not found"));
        };
        for (path, body) in &fixture.files {
            let file = target.join(path);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).expect("mkdir fixture");
            }
            std::fs::write(&file, body).expect("write fixture");
            if body.starts_with("#!") {
                set_mode(&file, 0o755);
            }
        }
        std::fs::create_dir_all(target.join(".git")).expect("mkdir .git");
        ProcessOutput::success("")
    }

    fn revision_of(&self, wdir: &Path) -> ProcessOutput {
        let name = wdir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.repos.lock().expect("repos").get(&name) {
            Some(fixture) => ProcessOutput::success(format!("{}\n", fixture.revision)),
            None => ProcessOutput::failure(128, "fatal: not a git repository"),
        }
    }
}

/// Checkouts keep the execute bit on scripts, as git does.
pub fn set_mode(file: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(file, std::fs::Permissions::from_mode(mode)).expect("chmod fixture");
}

#[async_trait]
impl ProcessExecutor for FakeHost {
    async fn execute(&self, spec: &CommandSpec, _timeout: Duration) -> ProcessOutput {
        let line = spec.to_string();
        if self
            .failing
            .lock()
            .expect("failing")
            .iter()
            .any(|prefix| line.starts_with(prefix.as_str()))
        {
            return ProcessOutput::failure(1, format!("scripted failure: {line}"));
        }

        let cwd = spec.cwd.clone().unwrap_or_default();
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match (spec.program.as_str(), args.as_slice()) {
            ("git", ["clone", url, name]) => self.clone_into(url, &cwd.join(name)),
            ("git", ["pull"]) => ProcessOutput::success("Already up to date.\n"),
            ("git", ["rev-parse", "HEAD"]) => self.revision_of(&cwd),
            ("docker", ["build", ..]) => ProcessOutput::success("Successfully built\n"),
            ("docker", ["login", ..]) if spec.stdin.as_deref() == Some(PASSWORD) => {
                ProcessOutput::success("Login Succeeded\n")
            }
            ("docker", ["login", ..]) => ProcessOutput::failure(1, "unauthorized"),
            ("docker", ["push", image]) => {
                self.published.lock().expect("published").insert(image.to_string());
                ProcessOutput::success("pushed\n")
            }
            ("./deployment", ["metadata.yaml"]) => {
                ProcessOutput::success("apiVersion: apps/v1\nkind: Deployment\n")
            }
            ("kubectl", ["apply", "-f", "deployment.yaml"]) => {
                ProcessOutput::success("deployment.apps/configured\n")
            }
            _ => ProcessOutput::failure(127, format!("unexpected command: {line}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream listing, image registry, routes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRepos {
    listing: Mutex<Vec<RepoListing>>,
    pub broken: AtomicBool,
}

impl FakeRepos {
    pub fn set(&self, names: &[&str]) {
        *self.listing.lock().expect("listing") = names
            .iter()
            .map(|name| RepoListing::new(*name, clone_url(name), "acme"))
            .collect();
    }

    pub fn add(&self, name: &str) {
        let mut listing = self.listing.lock().expect("listing");
        if !listing.iter().any(|repo| repo.name == name) {
            listing.push(RepoListing::new(name, clone_url(name), "acme"));
        }
    }
}

#[async_trait]
impl RepoSource for FakeRepos {
    async fn list_repositories(&self) -> Result<Vec<RepoListing>, ReconcileError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ReconcileError::Http {
                method: "GET",
                url: "https://api.test/orgs/acme/repos".into(),
                message: "status 502".into(),
            });
        }
        Ok(self.listing.lock().expect("listing").clone())
    }
}

pub struct FakeImages {
    published: Arc<Mutex<HashSet<String>>>,
    pub lookups: AtomicUsize,
    pub broken: AtomicBool,
}

#[async_trait]
impl ImageRegistry for FakeImages {
    async fn manifest_exists(&self, repository: &str, tag: &str) -> Result<bool, ReconcileError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(ReconcileError::Http {
                method: "GET",
                url: format!("https://{REGISTRY_HOST}/v2/{repository}/manifests/{tag}"),
                message: "status 401: UNAUTHORIZED".into(),
            });
        }
        let reference = format!("{REGISTRY_HOST}/{repository}:{tag}");
        Ok(self.published.lock().expect("published").contains(&reference))
    }
}

#[derive(Default)]
pub struct FakeRoutes {
    routes: Mutex<HashMap<String, String>>,
    pub creates: AtomicUsize,
}

impl FakeRoutes {
    pub fn prefix_of(&self, service: &str) -> Option<String> {
        self.routes.lock().expect("routes").get(service).cloned()
    }
}

#[async_trait]
impl RouteRegistry for FakeRoutes {
    async fn route_exists(&self, service: &str) -> Result<bool, ReconcileError> {
        Ok(self.routes.lock().expect("routes").contains_key(service))
    }

    async fn create_route(&self, service: &str, prefix: &str) -> Result<(), ReconcileError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.routes
            .lock()
            .expect("routes")
            .insert(service.to_string(), prefix.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub root: TempDir,
    pub host: Arc<FakeHost>,
    pub repos: Arc<FakeRepos>,
    pub images: Arc<FakeImages>,
    pub routes: Arc<FakeRoutes>,
    pub log: WorkLog,
    pub scheduler: Scheduler,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let root = TempDir::new().expect("root");
        let host = Arc::new(FakeHost::default());
        let repos = Arc::new(FakeRepos::default());
        let images = Arc::new(FakeImages {
            published: host.published.clone(),
            lookups: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
        });
        let routes = Arc::new(FakeRoutes::default());
        let log = WorkLog::new();
        let runner = CommandRunner::new(host.clone(), log.clone(), Duration::from_secs(5));
        let scheduler = Scheduler::start(4).expect("scheduler");
        let reconciler = Reconciler::new(
            Arc::new(ServiceRegistry::new()),
            runner,
            scheduler.handle(),
            Collaborators {
                repos: repos.clone(),
                images: images.clone(),
                routes: routes.clone(),
            },
            RegistryTarget {
                host: REGISTRY_HOST.into(),
                namespace: NAMESPACE.into(),
                user: "_json_key".into(),
                password: PASSWORD.into(),
            },
            root.path().join("work"),
        );
        Self {
            root,
            host,
            repos,
            images,
            routes,
            log,
            scheduler,
            reconciler,
        }
    }

    /// Publish a repository upstream and make it cloneable.
    pub fn publish(&self, name: &str, revision: &str, files: &[(&str, &str)]) {
        self.host.set_repo(name, revision, files);
        self.repos.add(name);
    }

    /// Trigger a sync and wait for every job it fans out to.
    pub async fn sync(&self) {
        self.reconciler.trigger_sync("test").expect("trigger");
        self.settle().await;
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.reconciler.scheduler().wait_idle())
            .await
            .expect("pipeline settled");
    }

    pub fn service(&self, name: &str) -> Service {
        self.reconciler
            .registry()
            .get(&ServiceName::from(name))
            .expect("service registered")
    }

    pub fn working_copy(&self, name: &str) -> std::path::PathBuf {
        self.reconciler.work_root().join(name)
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.snapshot().iter().map(|r| r.command_line()).collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }
}
