use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::ledger::LedgerStore;
use crate::library::Library;
use crate::observability::Metrics;
use crate::pipeline::Orchestrator;
use crate::storage::StorageClient;
use crate::sync::{AlwaysOnline, Connectivity, HttpProbe, SyncEngine};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub library: Library,
    pub sync: Arc<SyncEngine>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the services around an already opened ledger and remote store.
    pub fn new(
        config: Config,
        ledger: LedgerStore,
        remote: StorageClient,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let sync = Arc::new(SyncEngine::new(
            ledger.clone(),
            remote,
            connectivity,
            metrics.clone(),
            config.sync.clone(),
        ));
        let library = Library::new(ledger, sync.clone());
        let orchestrator = Arc::new(Orchestrator::new(library.clone(), metrics.clone()));

        Self {
            config: Arc::new(config),
            orchestrator,
            library,
            sync,
            metrics,
        }
    }

    /// Open the ledger and remote store described by `config`.
    pub fn from_config(config: Config) -> Result<Self, AnyError> {
        info!(path = %config.server.data_dir.display(), "Opening ledger");
        let ledger = LedgerStore::open(&config.server.data_dir)
            .map_err(|e| format!("Failed to open ledger: {}", e))?;

        let remote = StorageClient::from_config(&config.storage)
            .map_err(|e| format!("Failed to initialize storage: {}", e))?;
        info!(provider = ?config.storage.provider, bucket = %remote.bucket, "Remote storage ready");

        let connectivity: Arc<dyn Connectivity> = match &config.sync.connectivity_probe_url {
            Some(url) => Arc::new(
                HttpProbe::new(url.as_str())
                    .map_err(|e| format!("Failed to build connectivity probe: {}", e))?,
            ),
            None => Arc::new(AlwaysOnline),
        };

        Ok(Self::new(config, ledger, remote, connectivity))
    }
}
