//! The reconciler: sync, update, deploy and remove as scheduler jobs.
//!
//! Per service the steps form a chain: `sync` schedules `update`, a
//! successful `update` schedules `deploy`. All jobs for one service share the
//! key `service/<name>`, so a stale deploy can never overlap a fresh update of
//! the same working copy. Syncs share the key `sync`.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

use shipyard_core::{
    descriptor, RegistryError, Service, ServiceName, ServiceRegistry, SyncPlan, UpdateDescriptor,
};
use shipyard_exec::{CommandRunner, Job, JobResult, SchedulerHandle, WorkLog};

use crate::error::ReconcileError;
use crate::images::{ImageBuilder, RegistryTarget};
use crate::upstream::{ImageRegistry, RepoSource, RouteRegistry};
use crate::{manifest, routes, workspace};

pub const SYNC_KEY: &str = "sync";

/// Scheduler key for every job touching `service`.
pub fn service_key(service: &ServiceName) -> String {
    format!("service/{service}")
}

/// External systems the reconciler talks to over HTTP.
#[derive(Clone)]
pub struct Collaborators {
    pub repos: Arc<dyn RepoSource>,
    pub images: Arc<dyn ImageRegistry>,
    pub routes: Arc<dyn RouteRegistry>,
}

/// How an `update` step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The working copy has no descriptor; the service stays undeployed.
    NoDescriptor,
    /// Descriptor loaded; templates are never deployed.
    Template,
    DeployScheduled,
}

/// What a successful `deploy` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub version: String,
    pub images: BTreeMap<String, String>,
    pub manifest_applied: bool,
    pub route_created: bool,
}

pub struct Reconciler {
    registry: Arc<ServiceRegistry>,
    runner: CommandRunner,
    scheduler: SchedulerHandle,
    repos: Arc<dyn RepoSource>,
    routes: Arc<dyn RouteRegistry>,
    images: ImageBuilder,
    work_root: PathBuf,
    /// Names the most recent sync found upstream. A queued remove only acts
    /// on a name that is still absent here when it runs.
    listed: Mutex<HashSet<ServiceName>>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        runner: CommandRunner,
        scheduler: SchedulerHandle,
        collaborators: Collaborators,
        target: RegistryTarget,
        work_root: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let images = ImageBuilder::new(runner.clone(), collaborators.images, target);
        Arc::new(Self {
            registry,
            runner,
            scheduler,
            repos: collaborators.repos,
            routes: collaborators.routes,
            images,
            work_root: work_root.into(),
            listed: Mutex::new(HashSet::new()),
        })
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn work_log(&self) -> &WorkLog {
        self.runner.log()
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    fn listed(&self) -> MutexGuard<'_, HashSet<ServiceName>> {
        self.listed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    fn submit<F, T>(&self, label: String, key: String, step: F) -> Result<(), ReconcileError>
    where
        F: Future<Output = Result<T, ReconcileError>> + Send + 'static,
    {
        let job = Job::new(label, async move {
            let result: JobResult = step.await.map(drop).map_err(Into::into);
            result
        })
        .keyed(key);
        self.scheduler.schedule(job)?;
        Ok(())
    }

    /// Queue a sync. Returns as soon as the job is queued.
    pub fn trigger_sync(self: &Arc<Self>, reason: impl Into<String>) -> Result<(), ReconcileError> {
        let reason = reason.into();
        let this = Arc::clone(self);
        self.submit(format!("sync ({reason})"), SYNC_KEY.to_string(), async move {
            this.sync(&reason).await
        })
    }

    pub fn schedule_update(self: &Arc<Self>, name: ServiceName) -> Result<(), ReconcileError> {
        let this = Arc::clone(self);
        self.submit(format!("update {name}"), service_key(&name), async move {
            this.update(&name).await
        })
    }

    pub fn schedule_deploy(self: &Arc<Self>, name: ServiceName) -> Result<(), ReconcileError> {
        let this = Arc::clone(self);
        self.submit(format!("deploy {name}"), service_key(&name), async move {
            this.deploy(&name).await
        })
    }

    pub fn schedule_remove(self: &Arc<Self>, name: ServiceName) -> Result<(), ReconcileError> {
        let this = Arc::clone(self);
        self.submit(format!("remove {name}"), service_key(&name), async move {
            this.remove(&name).await
        })
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Reconcile the registry against the upstream listing.
    ///
    /// New names are registered, vanished names are scheduled for removal,
    /// and every desired service is scheduled for update. Running it again
    /// with an unchanged listing only queues updates that find nothing new.
    pub async fn sync(self: &Arc<Self>, reason: &str) -> Result<SyncPlan, ReconcileError> {
        let listing = self.repos.list_repositories().await?;
        let desired: Vec<Service> = listing.iter().map(|repo| repo.to_service()).collect();
        let plan = self
            .registry
            .diff(desired.iter().map(|service| service.name.clone()));
        info!(
            reason,
            add = plan.to_add.len(),
            remove = plan.to_remove.len(),
            keep = plan.to_keep.len(),
            "sync plan"
        );

        let mut names = Vec::with_capacity(desired.len());
        {
            let mut listed = self.listed();
            for name in &plan.to_remove {
                listed.remove(name);
            }
            for service in desired {
                let name = service.name.clone();
                listed.insert(name.clone());
                if self.registry.register(service) {
                    info!(service = %name, "service registered");
                }
                names.push(name);
            }
        }

        for name in &plan.to_remove {
            self.schedule_remove(name.clone())?;
        }
        for name in names {
            self.schedule_update(name)?;
        }
        Ok(plan)
    }

    /// Refresh the working copy and descriptor of one service.
    pub async fn update(self: &Arc<Self>, name: &ServiceName) -> Result<UpdateOutcome, ReconcileError> {
        let service = self.lookup(name)?;
        let wdir = workspace::checkout(&self.runner, &self.work_root, &service).await?;

        let Some(descriptor) = descriptor::load_at(&wdir).await? else {
            warn!(service = %name, "no descriptor in working copy, leaving undeployed");
            return Ok(UpdateOutcome::NoDescriptor);
        };
        let service = self.registry.set_descriptor(name, descriptor)?;
        if service.is_template() {
            info!(service = %name, "template service, not deploying");
            return Ok(UpdateOutcome::Template);
        }
        self.schedule_deploy(name.clone())?;
        Ok(UpdateOutcome::DeployScheduled)
    }

    /// Build, publish and roll out the checked-out revision of one service.
    pub async fn deploy(&self, name: &ServiceName) -> Result<DeployOutcome, ReconcileError> {
        let service = self.lookup(name)?;
        if service.is_template() {
            return Err(ReconcileError::Template {
                name: name.to_string(),
            });
        }
        let wdir = workspace::working_copy(&self.work_root, name.as_str());
        let version = workspace::head_revision(&self.runner, &wdir).await?;

        let images = self
            .images
            .resolve_all(&wdir, &service.containers(), &version)
            .await?;
        let service = self
            .registry
            .commit_deploy(name, version.clone(), images.clone())?;
        info!(service = %name, version = %version, images = images.len(), "images committed");

        // Pushed images stay committed even if the rollout below fails.
        let manifest_applied = manifest::render_and_apply(&self.runner, &wdir, &service).await?;
        let route_created = match service.route_prefix() {
            Some(prefix) => routes::ensure_route(self.routes.as_ref(), name.as_str(), prefix).await?,
            None => false,
        };

        Ok(DeployOutcome {
            version,
            images,
            manifest_applied,
            route_created,
        })
    }

    /// Forget a service and evict its working copy.
    ///
    /// A later sync may have found the repository again while this step sat
    /// in the service's lane; the service is then kept.
    pub async fn remove(&self, name: &ServiceName) -> Result<(), ReconcileError> {
        {
            let listed = self.listed();
            if listed.contains(name) {
                info!(service = %name, "service listed upstream again, keeping");
                return Ok(());
            }
            if self.registry.remove(name).is_none() {
                warn!(service = %name, "remove requested for unregistered service");
            }
        }
        workspace::discard(&workspace::working_copy(&self.work_root, name.as_str())).await?;
        info!(service = %name, "service removed");
        Ok(())
    }

    /// Append an update-API declaration to a service's history.
    pub fn update_descriptor(
        &self,
        name: &ServiceName,
        update: UpdateDescriptor,
    ) -> Result<Service, ReconcileError> {
        match self.registry.append_update(name, update) {
            Ok(service) => Ok(service),
            Err(err) => {
                error!(service = %name, error = %err, "descriptor update rejected");
                Err(err.into())
            }
        }
    }

    fn lookup(&self, name: &ServiceName) -> Result<Service, ReconcileError> {
        self.registry.get(name).ok_or_else(|| {
            RegistryError::ServiceNotFound {
                name: name.to_string(),
            }
            .into()
        })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("services", &self.registry.len())
            .field("work_root", &self.work_root)
            .finish_non_exhaustive()
    }
}
