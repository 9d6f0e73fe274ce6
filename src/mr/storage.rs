//! The staging store: per-task scratch directories with atomic-rename
//! publish, so a reader can never observe a half-written file, plus an
//! in-memory index from logical file name to published path.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::mr::error::Error;
use crate::mr::task::{KeyValue, TaskKind};

/// Reduce outputs whose name carries this prefix are promoted out of the
/// task's scratch directory to the output root.
pub const REDUCE_OUTPUT_PREFIX: &str = "mr-out-";

/// What workers require from the staging layer. A trait seam so tests can
/// interpose fault-injecting wrappers in front of the real store.
pub trait Store: Send + Sync {
    /// Write `entries` to a file named `name` owned by task `(kind, task_id)`
    /// and publish it atomically, replacing any prior version.
    fn write(
        &self,
        entries: &[KeyValue],
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<(), Error>;

    /// Read a published file back as decoded records. Lines without a tab
    /// separator are skipped.
    fn read_entries(&self, name: &str, task_id: i32, kind: TaskKind)
        -> Result<Vec<KeyValue>, Error>;

    /// Read a raw file resolved directly under the output root, bypassing
    /// the index. Used for map inputs.
    fn read_file(&self, name: &str, task_id: i32, kind: TaskKind) -> Result<String, Error>;

    /// Drop published files by name: index entry, file, and the owning
    /// directory once it is empty. Re-clearing already-cleared names is a
    /// no-op.
    fn clear_files(&self, names: &[String], task_id: i32, kind: TaskKind) -> Result<(), Error>;
}

/// Local-filesystem store. `root` must not span filesystems, since the
/// publish protocol depends on `rename` being atomic.
pub struct FsStore {
    root: RwLock<PathBuf>,
    index: DashMap<String, PathBuf>,
    locks: DashMap<(TaskKind, i32), Arc<Mutex<()>>>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: RwLock::new(root.into()),
            index: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Repoint the output root. Only meaningful before any task has written.
    pub fn set_root(&self, root: impl Into<PathBuf>) {
        *self.root.write() = root.into();
    }

    fn root(&self) -> PathBuf {
        self.root.read().clone()
    }

    /// The mutex serialising all operations of one `(kind, id)` identity, so
    /// a retried task cannot race a stalled earlier instance of itself.
    fn task_lock(&self, kind: TaskKind, task_id: i32) -> Arc<Mutex<()>> {
        self.locks
            .entry((kind, task_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn task_dir(&self, kind: TaskKind, task_id: i32) -> PathBuf {
        self.root().join(format!("{kind}-{task_id}"))
    }
}

/// Remove leftover `<name>.*.tmp` files from an interrupted earlier write.
fn sweep_stale_temps(dir: &Path, name: &str) -> Result<(), Error> {
    let prefix = format!("{name}.");
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(&prefix) && file_name.ends_with(".tmp") {
            debug!(%file_name, "sweeping stale temporary");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn encode(entries: &[KeyValue]) -> String {
    let mut buf = String::new();
    for kv in entries {
        buf.push_str(&kv.key);
        buf.push('\t');
        buf.push_str(&kv.value);
        buf.push('\n');
    }
    buf
}

impl Store for FsStore {
    fn write(
        &self,
        entries: &[KeyValue],
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<(), Error> {
        let lock = self.task_lock(kind, task_id);
        let _guard = lock.lock();

        let dir = self.task_dir(kind, task_id);
        fs::create_dir_all(&dir)?;
        sweep_stale_temps(&dir, name)?;

        // Write the whole file under a unique temporary name, then publish
        // with a rename. Concurrent writers of the same name cannot clobber
        // each other's temporaries; the final rename is last-writer-wins.
        let tmp = dir.join(format!("{name}.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, encode(entries))?;
        let target = dir.join(name);
        fs::rename(&tmp, &target)?;
        self.index.insert(name.to_string(), target.clone());

        // Final reduce outputs move up to the root; the scratch directory
        // goes away once nothing is left in it.
        if kind == TaskKind::Reduce && name.starts_with(REDUCE_OUTPUT_PREFIX) {
            let promoted = self.root().join(name);
            fs::rename(&target, &promoted)?;
            self.index.insert(name.to_string(), promoted);
            let _ = fs::remove_dir(&dir);
        }

        Ok(())
    }

    fn read_entries(
        &self,
        name: &str,
        task_id: i32,
        kind: TaskKind,
    ) -> Result<Vec<KeyValue>, Error> {
        let lock = self.task_lock(kind, task_id);
        let _guard = lock.lock();

        let path = self
            .index
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        Ok(content
            .lines()
            .filter_map(|line| {
                line.split_once('\t')
                    .map(|(key, value)| KeyValue::new(key.to_string(), value.to_string()))
            })
            .collect())
    }

    fn read_file(&self, name: &str, task_id: i32, kind: TaskKind) -> Result<String, Error> {
        let lock = self.task_lock(kind, task_id);
        let _guard = lock.lock();

        Ok(fs::read_to_string(self.root().join(name))?)
    }

    fn clear_files(&self, names: &[String], task_id: i32, kind: TaskKind) -> Result<(), Error> {
        let lock = self.task_lock(kind, task_id);
        let _guard = lock.lock();

        for name in names {
            let Some((_, path)) = self.index.remove(name) else {
                continue;
            };
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            if let Some(parent) = path.parent() {
                // Only succeeds once the directory is empty.
                let _ = fs::remove_dir(parent);
            }
        }
        Ok(())
    }
}
