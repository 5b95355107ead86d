use std::path::Path;
use std::sync::Arc;

use warden_core::config::WardenConfig;
use warden_core::decision::DecisionStore;
use warden_core::execution::ExecutionStore;
use warden_core::executor::{ExecutionAdapter, ExecutorRegistry};
use warden_core::jobs::JobQueue;
use warden_core::ledger::EvidenceLedger;
use warden_core::playbook::TemplateStore;
use warden_core::policy::PolicySet;
use warden_core::routing::{RoutingEngine, RunStore};
use warden_core::service::DecisionService;
use warden_core::store::open_db;

/// Shared application state passed to all route handlers. Everything here is
/// cheap to clone; the redb database behind the stores is shared.
#[derive(Clone)]
pub struct AppState {
    pub service: DecisionService,
    pub engine: RoutingEngine,
    pub queue: JobQueue,
    pub ledger: EvidenceLedger,
    pub config: WardenConfig,
}

impl AppState {
    /// Open (or create) the store under `root` and wire the services.
    pub fn new(root: &Path, registry: ExecutorRegistry) -> anyhow::Result<Self> {
        let config = WardenConfig::load(root)?;
        for warning in config.validate() {
            tracing::warn!(level = ?warning.level, "{}", warning.message);
        }
        let policy = match &config.policy_rules {
            Some(path) => PolicySet::load(&root.join(path))?,
            None => PolicySet::empty(),
        };

        let db = open_db(&root.join("warden.db"))?;
        let ledger = EvidenceLedger::new(db.clone())?;
        let adapter = ExecutionAdapter::new(
            ExecutionStore::new(db.clone())?,
            Arc::new(registry),
            ledger.clone(),
        );
        let queue = JobQueue::new(db.clone(), config.jobs.clone())?;
        let service = DecisionService::new(
            DecisionStore::new(db.clone())?,
            adapter.clone(),
            Arc::new(policy),
            ledger.clone(),
        );
        let engine = RoutingEngine::new(
            TemplateStore::new(db.clone())?,
            RunStore::new(db)?,
            adapter,
            queue.clone(),
            ledger.clone(),
        );

        Ok(Self {
            service,
            engine,
            queue,
            ledger,
            config,
        })
    }
}
