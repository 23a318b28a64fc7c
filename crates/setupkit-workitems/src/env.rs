use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::pending::PendingRemovals;
use crate::registry::RegistryStore;

/// Reports whether a file is held open by a running process.
pub trait InUseCheck {
    fn is_in_use(&self, path: &Path) -> bool;
}

impl<T: InUseCheck + ?Sized> InUseCheck for Rc<T> {
    fn is_in_use(&self, path: &Path) -> bool {
        (**self).is_in_use(path)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverInUse;

impl InUseCheck for NeverInUse {
    fn is_in_use(&self, _path: &Path) -> bool {
        false
    }
}

/// Persistent state a mutation sequence operates on.
pub struct MutationEnv {
    registry: RegistryStore,
    pending: PendingRemovals,
    backup_dir: PathBuf,
    in_use: Box<dyn InUseCheck>,
    next_backup: Cell<u64>,
}

impl MutationEnv {
    pub fn new(registry: RegistryStore, pending: PendingRemovals, backup_dir: PathBuf) -> Self {
        Self {
            registry,
            pending,
            backup_dir,
            in_use: Box::new(NeverInUse),
            next_backup: Cell::new(0),
        }
    }

    pub fn with_in_use_check(mut self, check: Box<dyn InUseCheck>) -> Self {
        self.in_use = check;
        self
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn pending(&self) -> &PendingRemovals {
        &self.pending
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn is_in_use(&self, path: &Path) -> bool {
        self.in_use.is_in_use(path)
    }

    /// Reserves a fresh location under the backup directory for `original`.
    pub(crate) fn reserve_backup_path(&self, original: &Path) -> PathBuf {
        let slot = self.next_backup.get();
        self.next_backup.set(slot + 1);
        let label = original
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        self.backup_dir.join(format!("{slot:04}-{label}"))
    }
}

impl fmt::Debug for MutationEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationEnv")
            .field("registry", &self.registry)
            .field("pending", &self.pending)
            .field("backup_dir", &self.backup_dir)
            .finish_non_exhaustive()
    }
}
