//! The write path: resolve sheet, take the lock, append one row, let go.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::WriteConfig;
use crate::error::WriteError;
use crate::lock::{LockGuard, WriteLock};
use crate::model::{Record, RecordFields};
use crate::storage::RecordStore;

/// Success outcome of one append.
#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    /// 1-based position of the new row; the header is row 1.
    pub row: usize,
    /// From entry to just before the lock was released.
    pub elapsed: Duration,
    /// `elapsed` as a fraction of the configured execution budget.
    pub quota_used: f64,
}

pub struct WriteCoordinator {
    store: Arc<dyn RecordStore>,
    lock: Arc<dyn WriteLock>,
    config: WriteConfig,
}

impl WriteCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, lock: Arc<dyn WriteLock>, config: WriteConfig) -> Self {
        Self { store, lock, config }
    }

    pub fn config(&self) -> &WriteConfig {
        &self.config
    }

    /// Appends one record. Blocks for at most the configured lock timeout.
    ///
    /// Nothing escapes this call: store faults and panics inside the critical
    /// section come back as [`WriteError::Internal`], after the lock is released.
    pub fn append(&self, fields: RecordFields) -> Result<Appended, WriteError> {
        let started = Instant::now();
        let sheet = self.config.sheet_name.as_str();

        self.store.get_or_create_sheet(sheet).map_err(|e| {
            error!(sheet, error = %e, "failed to resolve sheet");
            WriteError::Internal(e.to_string())
        })?;

        let guard = match LockGuard::acquire(self.lock.as_ref(), self.config.lock_timeout) {
            Some(guard) => guard,
            None => {
                let timeout_ms = self.config.lock_timeout.as_millis() as u64;
                warn!(sheet, timeout_ms, "write lock busy, rejecting append");
                return Err(WriteError::LockTimeout { timeout_ms });
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let row = Record::stamp(fields, Utc::now()).into_row();
            self.store.append_row(sheet, row)
        }));
        let elapsed = started.elapsed();
        drop(guard);

        let row = match outcome {
            Ok(Ok(row)) => row,
            Ok(Err(e)) => {
                error!(sheet, error = %e, "append failed");
                return Err(WriteError::Internal(e.to_string()));
            }
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                error!(sheet, panic = %detail, "append panicked");
                return Err(WriteError::Internal(detail));
            }
        };

        let quota_used = quota_fraction(elapsed, self.config.max_execution);
        if quota_used >= self.config.quota_warning_threshold {
            warn!(
                sheet,
                elapsed_ms = elapsed.as_millis() as u64,
                quota_pct = quota_used * 100.0,
                "append used most of the execution budget"
            );
        }
        info!(sheet, row, elapsed_ms = elapsed.as_millis() as u64, "row appended");

        Ok(Appended {
            row,
            elapsed,
            quota_used,
        })
    }
}

/// A zero budget measures nothing and never warns.
fn quota_fraction(elapsed: Duration, budget: Duration) -> f64 {
    if budget.is_zero() {
        return 0.0;
    }
    elapsed.as_secs_f64() / budget.as_secs_f64()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
