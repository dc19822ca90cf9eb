use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::composite_queue::{CompositeQueue, QueueOption};
use crate::error::{MqError, Result};

const MQ_EXTENSION: &str = "mq";

/// Shared sizing defaults applied to any queue opened without an explicit
/// override.
#[derive(Debug, Clone)]
pub struct RegistryDefaults {
    pub data_dir: PathBuf,
    pub file_block_unit: u64,
    pub cache_size: u64,
}

/// `name -> CompositeQueue`, guarded by a single mutex. No queue operation
/// is ever invoked while this lock is held — only the map
/// lookup/insert/remove happens under it.
pub struct QueueRegistry {
    defaults: RegistryDefaults,
    queues: Mutex<HashMap<String, Arc<CompositeQueue>>>,
}

/// Filesystem-safe means: non-empty, no path separator, and not a `.`/`..`
/// component — the minimal tightening that keeps a queue name from ever
/// escaping `data_dir`.
fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(MqError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

impl QueueRegistry {
    pub fn new(defaults: RegistryDefaults) -> Self {
        Self {
            defaults,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn option_for(&self, name: &str) -> QueueOption {
        QueueOption {
            name: name.to_string(),
            backing_path: backing_path(&self.defaults.data_dir, name),
            file_block_unit: self.defaults.file_block_unit,
            cache_size: self.defaults.cache_size,
        }
    }

    /// Returns the existing queue for `name`, opening and inserting a new
    /// one if it doesn't exist yet.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<CompositeQueue>> {
        validate_queue_name(name)?;

        {
            let queues = self.queues.lock().unwrap();
            if let Some(q) = queues.get(name) {
                return Ok(q.clone());
            }
        }

        // Opening touches the filesystem and must not happen while the map
        // lock is held; a second caller racing to create the same queue
        // just does the open twice and the loser's queue is dropped.
        let queue = Arc::new(CompositeQueue::open(self.option_for(name))?);

        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(name.to_string()).or_insert(queue).clone();
        Ok(queue)
    }

    /// No-op if `name` is unknown. Otherwise deletes the queue's backing
    /// file and removes it from the map.
    pub fn delete(&self, name: &str) -> Result<()> {
        let removed = {
            let mut queues = self.queues.lock().unwrap();
            queues.remove(name)
        };
        match removed {
            Some(q) => q.delete(),
            None => Ok(()),
        }
    }

    pub fn queues(&self) -> Vec<String> {
        self.queues.lock().unwrap().keys().cloned().collect()
    }

    /// Closes every queue, logging and keeping any that fail to close
    /// rather than losing track of them.
    pub fn close_all(&self) {
        // Collect names first: closing mutates queue state but not the map
        // itself, so there's no actual mutate-during-iterate hazard here,
        // but draining into a owned Vec keeps the map lock scope tight.
        let entries: Vec<(String, Arc<CompositeQueue>)> = {
            let queues = self.queues.lock().unwrap();
            queues.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut failed = Vec::new();
        for (name, queue) in entries {
            match queue.close() {
                Ok(()) => {}
                Err(e) => {
                    log::error!("failed to close queue {name}: {e}");
                    failed.push(name);
                }
            }
        }

        let mut queues = self.queues.lock().unwrap();
        queues.retain(|name, _| failed.contains(name));
    }

    /// Enumerates `*.mq` files in `data_dir` and opens each, deriving the
    /// queue name by stripping the extension. Per-file failures are logged
    /// and skipped rather than aborting startup.
    pub fn load(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.defaults.data_dir) {
            Ok(e) => e,
            Err(e) => {
                log::error!(
                    "failed to list data directory {}: {}",
                    self.defaults.data_dir.display(),
                    e
                );
                return Err(e.into());
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MQ_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match CompositeQueue::open(self.option_for(name)) {
                Ok(queue) => {
                    self.queues
                        .lock()
                        .unwrap()
                        .insert(name.to_string(), Arc::new(queue));
                }
                Err(e) => {
                    log::error!("failed to load queue data file {}: {}", path.display(), e);
                    continue;
                }
            }
        }
        Ok(())
    }
}

fn backing_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("{name}.{MQ_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(dir: &Path) -> QueueRegistry {
        QueueRegistry::new(RegistryDefaults {
            data_dir: dir.to_path_buf(),
            file_block_unit: 4096,
            cache_size: 512,
        })
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path());
        let a = reg.get_or_create("q1").unwrap();
        let b = reg.get_or_create("q1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.queues(), vec!["q1".to_string()]);
    }

    #[test]
    fn rejects_unsafe_names() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path());
        assert!(reg.get_or_create("../escape").is_err());
        assert!(reg.get_or_create("").is_err());
        assert!(reg.get_or_create("a/b").is_err());
    }

    #[test]
    fn delete_removes_file_and_map_entry() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path());
        let q = reg.get_or_create("q1").unwrap();
        q.put(b"x").unwrap();
        reg.delete("q1").unwrap();
        assert!(reg.queues().is_empty());
        assert!(!dir.path().join("q1.mq").exists());
    }

    #[test]
    fn delete_of_unknown_queue_is_a_no_op() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path());
        assert!(reg.delete("ghost").is_ok());
    }

    #[test]
    fn load_discovers_existing_backing_files() {
        let dir = tempdir().unwrap();
        {
            let reg = registry(dir.path());
            reg.get_or_create("alpha").unwrap().put(b"hi").unwrap();
            reg.get_or_create("beta").unwrap().put(b"there").unwrap();
            reg.close_all();
        }

        let reg2 = registry(dir.path());
        reg2.load().unwrap();
        let mut names = reg2.queues();
        names.sort();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(reg2.get_or_create("alpha").unwrap().len(), 1);
    }
}
