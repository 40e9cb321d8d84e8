pub mod model;
pub mod error;
pub mod config;
pub mod storage;
pub mod lock;
pub mod validator;
pub mod coordinator;
pub mod response;
pub mod aggregator;
pub mod server;
pub mod client;
pub mod dashboard;
pub mod logging;

use std::fmt;
use std::sync::Arc;

use crate::aggregator::ReadAggregator;
use crate::config::Settings;
use crate::coordinator::WriteCoordinator;
use crate::lock::{LeaseLock, WriteLock};
use crate::model::Row;
use crate::response::{Envelope, Outcome};
use crate::storage::RecordStore;
use crate::validator::validate_payload;

/// Both entry points of the service: validated writes and unlocked reads.
pub struct TallyService {
    coordinator: WriteCoordinator,
    aggregator: ReadAggregator,
}

impl fmt::Debug for TallyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TallyService")
        .field("sheet", &self.coordinator.config().sheet_name)
        .finish()
    }
}

impl TallyService {
    pub fn new(store: Arc<dyn RecordStore>, lock: Arc<dyn WriteLock>, settings: &Settings) -> Self {
        Self {
            coordinator: WriteCoordinator::new(store.clone(), lock, settings.write_config()),
            aggregator: ReadAggregator::new(store, settings.sheet_name.clone()),
        }
    }

    /// Uses a [`LeaseLock`] with the lease taken from `settings`.
    pub fn with_store(store: Arc<dyn RecordStore>, settings: &Settings) -> Self {
        let lock = Arc::new(LeaseLock::new(settings.lock_lease()));
        Self::new(store, lock, settings)
    }

    pub fn sheet_name(&self) -> &str {
        &self.coordinator.config().sheet_name
    }

    /// Validate, append, wrap. Blocks while waiting for the write lock.
    pub fn submit(&self, body: Option<&[u8]>) -> Envelope {
        let outcome: Outcome = match validate_payload(body) {
            Ok(fields) => match self.coordinator.append(fields) {
                Ok(appended) => appended.into(),
                Err(e) => e.into(),
            },
            Err(e) => e.into(),
        };
        response::build(&outcome)
    }

    pub fn rows(&self) -> Vec<Row> {
        self.aggregator.read_all()
    }
}
