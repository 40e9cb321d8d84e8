use std::sync::Arc;

use tracing::{debug, error};

use crate::model::Row;
use crate::storage::RecordStore;

/// Read side. Hands rows over untouched; summarising is the dashboard's job.
pub struct ReadAggregator {
    store: Arc<dyn RecordStore>,
    sheet_name: String,
}

impl ReadAggregator {
    pub fn new(store: Arc<dyn RecordStore>, sheet_name: impl Into<String>) -> Self {
        Self {
            store,
            sheet_name: sheet_name.into(),
        }
    }

    /// Every row, header first. Missing sheets and read faults both come back empty.
    pub fn read_all(&self) -> Vec<Row> {
        match self.store.read_all_rows(&self.sheet_name) {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                debug!(sheet = %self.sheet_name, "sheet does not exist yet");
                Vec::new()
            }
            Err(e) => {
                error!(sheet = %self.sheet_name, error = %e, "failed to read sheet");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::header_row;
    use crate::storage::MemoryStore;
    use serde_json::json;

    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn get_or_create_sheet(&self, _name: &str) -> Result<(), StoreError> {
            Ok(())
        }

        fn append_row(&self, name: &str, _row: Row) -> Result<usize, StoreError> {
            Err(StoreError::SheetNotFound(name.into()))
        }

        fn read_all_rows(&self, _name: &str) -> Result<Option<Vec<Row>>, StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "no access",
            )))
        }

        fn delete_sheet(&self, _name: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[test]
    fn missing_sheet_reads_empty() {
        let aggregator = ReadAggregator::new(Arc::new(MemoryStore::new()), "Processed_Data");
        assert!(aggregator.read_all().is_empty());
    }

    #[test]
    fn read_fault_degrades_to_empty() {
        let aggregator = ReadAggregator::new(Arc::new(BrokenStore), "Processed_Data");
        assert!(aggregator.read_all().is_empty());
    }

    #[test]
    fn rows_come_back_header_first() {
        let store = Arc::new(MemoryStore::new());
        store.get_or_create_sheet("s").unwrap();
        store
            .append_row("s", vec![json!("t"), json!(1), json!("ok"), json!(5)])
            .unwrap();

        let rows = ReadAggregator::new(store, "s").read_all();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], header_row());
    }
}
