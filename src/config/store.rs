//! Cache of loaded configurations keyed by normalized path.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Config, ConfigError, HostContext};

type Slot = Arc<Mutex<Option<Arc<Config>>>>;

/// Owns every loaded [`Config`] of the hosting process.
///
/// Lookups for different paths only contend on the short-held slot map lock.
/// Lookups for the same path serialize on that path's slot, so a file is
/// parsed at most once per modification.
pub struct ConfigStore {
    host: HostContext,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl ConfigStore {
    pub fn new(host: HostContext) -> Self {
        Self {
            host,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    /// Cache key for `path`: absolute, relative to the hosting module's directory.
    pub fn normalize(&self, path: &Path) -> PathBuf {
        normalize_path(self.host.module_dir(), path)
    }

    /// Return the cached config for `path`, loading or reloading it as needed.
    ///
    /// A cached entry is reloaded when the file's modification time is newer
    /// than the one recorded at load time. The replaced config releases its
    /// endpoint immediately, even if callers still hold it.
    pub fn get_config(&self, path: impl AsRef<Path>) -> Result<Arc<Config>, ConfigError> {
        let full = self.normalize(path.as_ref());
        loop {
            let slot = self.slot(&full)?;
            let mut entry = slot.lock().map_err(|e| {
                tracing::error!("Config slot lock poisoned for '{}': {}", full.display(), e);
                ConfigError::LockPoisoned
            })?;

            // evict/clear may have detached this slot while we waited for it
            if !self.is_current(&full, &slot)? {
                tracing::debug!("Config slot for '{}' was evicted, retrying", full.display());
                continue;
            }

            if let Some(cached) = entry.clone() {
                match std::fs::metadata(&full).and_then(|m| m.modified()) {
                    Ok(modified) if modified > cached.last_modified() => {
                        tracing::info!("Config '{}' changed on disk, reloading", full.display());
                        *entry = None;
                        cached.release_endpoint();
                    }
                    Ok(_) => {
                        tracing::debug!("Config cache hit: {}", full.display());
                        return Ok(cached);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Could not stat '{}' ({}), keeping cached config",
                            full.display(),
                            e
                        );
                        return Ok(cached);
                    }
                }
            }

            return match Config::load(&full, &self.host) {
                Ok(config) => {
                    let config = Arc::new(config);
                    *entry = Some(config.clone());
                    Ok(config)
                }
                Err(e) => {
                    // waiters on this slot see it detached and start over
                    if let Err(prune_err) = self.prune(&full, &slot) {
                        tracing::warn!("Failed to prune slot for '{}': {}", full.display(), prune_err);
                    }
                    Err(e)
                }
            };
        }
    }

    /// Drop the cached config for `path`. Returns whether one was cached.
    pub fn evict(&self, path: impl AsRef<Path>) -> Result<bool, ConfigError> {
        let full = self.normalize(path.as_ref());
        let slot = self.lock_slots()?.remove(&full);
        let evicted = slot.and_then(|slot| take_config(&slot));
        if let Some(config) = &evicted {
            tracing::info!("Evicted config '{}'", config.source_path().display());
        }
        Ok(evicted.is_some())
    }

    /// Drop every cached config.
    pub fn clear(&self) -> Result<(), ConfigError> {
        let slots: Vec<Slot> = self.lock_slots()?.drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            take_config(&slot);
        }
        Ok(())
    }

    /// Number of paths with a live config.
    pub fn len(&self) -> usize {
        // slots are locked after the map lock is released, matching get_config's order
        let slots: Vec<Slot> = match self.lock_slots() {
            Ok(slots) => slots.values().cloned().collect(),
            Err(_) => return 0,
        };
        slots
            .iter()
            .filter(|slot| slot.lock().map(|s| s.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, full: &Path) -> Result<Slot, ConfigError> {
        let mut slots = self.lock_slots()?;
        Ok(slots.entry(full.to_path_buf()).or_default().clone())
    }

    fn is_current(&self, full: &Path, slot: &Slot) -> Result<bool, ConfigError> {
        Ok(self
            .lock_slots()?
            .get(full)
            .map_or(false, |current| Arc::ptr_eq(current, slot)))
    }

    /// Remove `slot` from the map if it is still the one registered for `full`.
    fn prune(&self, full: &Path, slot: &Slot) -> Result<(), ConfigError> {
        let mut slots = self.lock_slots()?;
        if slots.get(full).map_or(false, |current| Arc::ptr_eq(current, slot)) {
            slots.remove(full);
        }
        Ok(())
    }

    /// Mutex 락 획득 헬퍼
    fn lock_slots(&self) -> Result<MutexGuard<'_, HashMap<PathBuf, Slot>>, ConfigError> {
        self.slots.lock().map_err(|e| {
            tracing::error!("ConfigStore lock poisoned: {}", e);
            ConfigError::LockPoisoned
        })
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        if let Err(e) = self.clear() {
            tracing::warn!("Failed to tear down config store: {}", e);
        }
    }
}

fn take_config(slot: &Slot) -> Option<Arc<Config>> {
    let config = slot.lock().unwrap_or_else(|e| e.into_inner()).take()?;
    config.release_endpoint();
    Some(config)
}

/// Join `path` onto `base_dir` when relative and drop `.`/`..` components.
pub fn normalize_path(base_dir: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
