//! Record store adapters.
//!
//! A store holds named sheets. Each sheet is an ordered, append-only list of rows whose
//! first row is the header. The core only ever calls the four operations of
//! [`RecordStore`]; durability is the adapter's business.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::model::{header_row, Row};

const SHEET_EXTENSION: &str = "sheet";

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub trait RecordStore: Send + Sync {
    /// Creates the sheet with its header row if it does not exist yet. Idempotent.
    fn get_or_create_sheet(&self, name: &str) -> Result<(), StoreError>;

    /// Appends one row and returns its 1-based position (header is row 1).
    fn append_row(&self, name: &str, row: Row) -> Result<usize, StoreError>;

    /// All rows, header first. `None` when the sheet does not exist.
    fn read_all_rows(&self, name: &str) -> Result<Option<Vec<Row>>, StoreError>;

    /// Maintenance only. Returns whether the sheet existed.
    fn delete_sheet(&self, name: &str) -> Result<bool, StoreError>;
}

fn check_sheet_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(StoreError::InvalidSheetName(name.to_string()));
    }
    Ok(())
}

// --- File-backed sheets ---

/// One sheet on disk: `[len u32 LE][JSON row]` frames, header frame first.
#[derive(Debug)]
struct SheetFile {
    file: File,
    current_offset: u64,
    rows: usize,
}

impl SheetFile {
    /// Creates a fresh sheet file and writes the header. Fails with `AlreadyExists`
    /// if another creator got there first.
    fn create(path: &Path, strict: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut sheet = Self {
            file,
            current_offset: 0,
            rows: 0,
        };
        sheet.append(&header_row(), strict)?;
        Ok(sheet)
    }

    /// Opens an existing sheet file, dropping a torn tail. A file with no committed
    /// frames (creator died before its header landed) gets the header now; a file
    /// whose first frame is something else is refused.
    fn open(path: &Path, strict: bool) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let scan = scan_frames(&mut file)?;
        if scan.valid_len < file.metadata()?.len() {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                "truncating torn trailing frame"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(scan.valid_len))?;

        let mut sheet = Self {
            file,
            current_offset: scan.valid_len,
            rows: scan.rows.len(),
        };
        match scan.rows.first() {
            None => {
                warn!(path = %path.display(), "sheet has no header row, writing it");
                sheet.append(&header_row(), strict)?;
            }
            Some(first) if *first != header_row() => {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("{} does not start with the header row", path.display()),
                ));
            }
            Some(_) => {}
        }
        Ok(sheet)
    }

    fn append(&mut self, row: &Row, strict: bool) -> io::Result<usize> {
        self.append_with(row, |file| if strict { file.sync_data() } else { Ok(()) })
    }

    /// Writes one frame, then runs `sync`. Any failure past the seek cuts the file
    /// back to the last committed frame so a reported failure leaves no row behind.
    fn append_with(&mut self, row: &Row, sync: impl FnOnce(&File) -> io::Result<()>) -> io::Result<usize> {
        let bytes = serde_json::to_vec(row)?;
        let len = u32::try_from(bytes.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "row too large"))?;

        // One write per frame so a crash leaves at most one torn frame at the tail.
        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);

        self.file.seek(SeekFrom::Start(self.current_offset))?;
        if let Err(e) = self.file.write_all(&frame).and_then(|()| sync(&self.file)) {
            if let Err(undo) = self.file.set_len(self.current_offset) {
                error!(error = %undo, offset = self.current_offset, "could not roll back failed append");
            }
            return Err(e);
        }

        self.current_offset += frame.len() as u64;
        self.rows += 1;
        Ok(self.rows)
    }
}

struct FrameScan {
    rows: Vec<Row>,
    valid_len: u64,
}

/// Reads frames from the start of `file` until EOF or the first incomplete or
/// undecodable frame. Everything before that point is a committed prefix.
fn scan_frames(file: &mut File) -> io::Result<FrameScan> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = io::BufReader::new(file);
    let mut rows = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            break;
        }

        let mut bytes = vec![0u8; len as usize];
        match reader.read_exact(&mut bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }

        match serde_json::from_slice::<Row>(&bytes) {
            Ok(row) => rows.push(row),
            Err(_) => break,
        }
        valid_len += 4 + len as u64;
    }

    Ok(FrameScan { rows, valid_len })
}

/// Sheets stored as files under one directory.
///
/// Appends to a sheet are serialized by a per-sheet mutex; readers open their
/// own handle and see whatever prefix of complete frames is on disk.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    strict_durability: bool,
    sheets: Mutex<HashMap<String, Arc<Mutex<SheetFile>>>>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>, strict_durability: bool) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            strict_durability,
            sheets: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sheet_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{SHEET_EXTENSION}"))
    }

    fn sheet(&self, name: &str, create: bool) -> Result<Option<Arc<Mutex<SheetFile>>>, StoreError> {
        check_sheet_name(name)?;

        let mut sheets = self.sheets.lock();
        if let Some(sheet) = sheets.get(name) {
            return Ok(Some(sheet.clone()));
        }

        let path = self.sheet_path(name);
        let sheet = if create {
            match SheetFile::create(&path, self.strict_durability) {
                Ok(sheet) => {
                    debug!(sheet = name, "created sheet");
                    sheet
                }
                // Lost the race to another process: its header stands.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => SheetFile::open(&path, self.strict_durability)?,
                Err(e) => return Err(e.into()),
            }
        } else {
            match SheetFile::open(&path, self.strict_durability) {
                Ok(sheet) => sheet,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        };

        let sheet = Arc::new(Mutex::new(sheet));
        sheets.insert(name.to_string(), sheet.clone());
        Ok(Some(sheet))
    }
}

impl RecordStore for FileStore {
    fn get_or_create_sheet(&self, name: &str) -> Result<(), StoreError> {
        self.sheet(name, true).map(|_| ())
    }

    fn append_row(&self, name: &str, row: Row) -> Result<usize, StoreError> {
        let sheet = self
            .sheet(name, false)?
            .ok_or_else(|| StoreError::SheetNotFound(name.to_string()))?;
        let mut sheet = sheet.lock();
        Ok(sheet.append(&row, self.strict_durability)?)
    }

    fn read_all_rows(&self, name: &str) -> Result<Option<Vec<Row>>, StoreError> {
        check_sheet_name(name)?;
        let mut file = match File::open(self.sheet_path(name)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(scan_frames(&mut file)?.rows))
    }

    fn delete_sheet(&self, name: &str) -> Result<bool, StoreError> {
        check_sheet_name(name)?;
        let mut sheets = self.sheets.lock();
        sheets.remove(name);
        match fs::remove_file(self.sheet_path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// --- In-memory sheets ---

/// Volatile store, used by tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get_or_create_sheet(&self, name: &str) -> Result<(), StoreError> {
        check_sheet_name(name)?;
        self.sheets
            .write()
            .entry(name.to_string())
            .or_insert_with(|| vec![header_row()]);
        Ok(())
    }

    fn append_row(&self, name: &str, row: Row) -> Result<usize, StoreError> {
        let mut sheets = self.sheets.write();
        let rows = sheets
            .get_mut(name)
            .ok_or_else(|| StoreError::SheetNotFound(name.to_string()))?;
        rows.push(row);
        Ok(rows.len())
    }

    fn read_all_rows(&self, name: &str) -> Result<Option<Vec<Row>>, StoreError> {
        Ok(self.sheets.read().get(name).cloned())
    }

    fn delete_sheet(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.sheets.write().remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn data_row(id: i64) -> Row {
        vec![json!("2026-01-01T00:00:00.000Z"), json!(id), json!("ok"), json!(id * 10)]
    }

    #[test]
    fn file_store_creates_header_once_and_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), true).unwrap();

        store.get_or_create_sheet("Processed_Data").unwrap();
        store.get_or_create_sheet("Processed_Data").unwrap();
        assert_eq!(store.append_row("Processed_Data", data_row(1)).unwrap(), 2);
        assert_eq!(store.append_row("Processed_Data", data_row(2)).unwrap(), 3);

        let rows = store.read_all_rows("Processed_Data").unwrap().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], header_row());
        assert_eq!(rows[2], data_row(2));
    }

    #[test]
    fn file_store_reopens_with_row_count_intact() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path(), false).unwrap();
            store.get_or_create_sheet("s").unwrap();
            store.append_row("s", data_row(1)).unwrap();
        }

        let store = FileStore::open(dir.path(), false).unwrap();
        store.get_or_create_sheet("s").unwrap();
        assert_eq!(store.append_row("s", data_row(2)).unwrap(), 3);
        assert_eq!(store.read_all_rows("s").unwrap().unwrap()[0], header_row());
    }

    #[test]
    fn torn_trailing_frame_is_ignored_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sheet");
        {
            let store = FileStore::open(dir.path(), true).unwrap();
            store.get_or_create_sheet("s").unwrap();
            store.append_row("s", data_row(1)).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&64u32.to_le_bytes()).unwrap();
            file.write_all(b"[\"half").unwrap();
        }

        let store = FileStore::open(dir.path(), true).unwrap();
        assert_eq!(store.read_all_rows("s").unwrap().unwrap().len(), 2);

        store.get_or_create_sheet("s").unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
        assert_eq!(store.append_row("s", data_row(2)).unwrap(), 3);
        assert_eq!(store.read_all_rows("s").unwrap().unwrap().len(), 3);
    }

    #[test]
    fn missing_sheet_reads_as_none_and_rejects_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();

        assert!(store.read_all_rows("nope").unwrap().is_none());
        assert!(matches!(
            store.append_row("nope", data_row(1)),
            Err(StoreError::SheetNotFound(_))
        ));
    }

    #[test]
    fn path_like_sheet_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                store.get_or_create_sheet(name),
                Err(StoreError::InvalidSheetName(_))
            ));
        }
    }

    #[test]
    fn racing_creators_leave_a_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path(), false).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.get_or_create_sheet("race").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.read_all_rows("race").unwrap().unwrap(), vec![header_row()]);
    }

    #[test]
    fn separate_handles_share_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileStore::open(dir.path(), true).unwrap();
        let second = FileStore::open(dir.path(), true).unwrap();

        first.get_or_create_sheet("shared").unwrap();
        second.get_or_create_sheet("shared").unwrap();
        assert_eq!(second.append_row("shared", data_row(1)).unwrap(), 2);

        let rows = first.read_all_rows("shared").unwrap().unwrap();
        assert_eq!(rows, vec![header_row(), data_row(1)]);
    }

    #[test]
    fn racing_handles_leave_a_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = dir.path().to_path_buf();
                thread::spawn(move || {
                    let store = FileStore::open(root, false).unwrap();
                    store.get_or_create_sheet("race").unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            FileStore::open(dir.path(), false).unwrap().read_all_rows("race").unwrap().unwrap(),
            vec![header_row()]
        );
    }

    #[test]
    fn headerless_sheet_file_gets_its_header_back() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("s.sheet")).unwrap();

        let store = FileStore::open(dir.path(), true).unwrap();
        store.get_or_create_sheet("s").unwrap();
        assert_eq!(store.append_row("s", data_row(1)).unwrap(), 2);
        assert_eq!(store.read_all_rows("s").unwrap().unwrap(), vec![header_row(), data_row(1)]);
    }

    #[test]
    fn sheet_not_starting_with_header_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sheet = SheetFile::create(&dir.path().join("tmp.sheet"), false).unwrap();
            sheet.append(&data_row(1), false).unwrap();
        }
        let bytes = fs::read(dir.path().join("tmp.sheet")).unwrap();
        let header_len = 4 + u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        fs::write(dir.path().join("s.sheet"), &bytes[header_len..]).unwrap();

        let store = FileStore::open(dir.path(), false).unwrap();
        assert!(matches!(store.get_or_create_sheet("s"), Err(StoreError::Io(_))));
    }

    #[test]
    fn failed_sync_leaves_no_row_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sheet");
        let mut sheet = SheetFile::create(&path, false).unwrap();
        let committed_len = fs::metadata(&path).unwrap().len();

        let err = sheet
            .append_with(&data_row(1), |_| Err(io::Error::new(ErrorKind::Other, "disk gone")))
            .unwrap_err();
        assert_eq!(err.to_string(), "disk gone");
        assert_eq!(fs::metadata(&path).unwrap().len(), committed_len);

        let store = FileStore::open(dir.path(), false).unwrap();
        assert_eq!(store.read_all_rows("s").unwrap().unwrap(), vec![header_row()]);
        assert_eq!(sheet.append(&data_row(2), false).unwrap(), 2);
        assert_eq!(store.read_all_rows("s").unwrap().unwrap(), vec![header_row(), data_row(2)]);
    }

    #[test]
    fn delete_sheet_is_maintenance_only_and_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), false).unwrap();
        store.get_or_create_sheet("tmp").unwrap();

        assert!(store.delete_sheet("tmp").unwrap());
        assert!(!store.delete_sheet("tmp").unwrap());
        assert!(store.read_all_rows("tmp").unwrap().is_none());
    }

    #[test]
    fn memory_store_positions_include_header() {
        let store = MemoryStore::new();
        store.get_or_create_sheet("m").unwrap();
        assert_eq!(store.append_row("m", data_row(1)).unwrap(), 2);
        assert_eq!(store.read_all_rows("m").unwrap().unwrap().len(), 2);
        assert!(store.read_all_rows("other").unwrap().is_none());
    }
}
