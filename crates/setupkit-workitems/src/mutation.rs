use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::env::MutationEnv;
use crate::error::MutationError;
use crate::fs_utils::{copy_path, dir_is_empty, files_identical, move_path, path_exists, remove_path};
use crate::registry::{KeyValue, RegistryStore};

/// Apply/undo contract shared by every mutation variant.
///
/// `rollback` undoes only what `apply` recorded, so calling it twice, or after
/// an `apply` that failed half way, is harmless.
trait Reversible {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError>;
    fn rollback(&mut self, env: &MutationEnv) -> Result<(), MutationError>;
    fn target(&self) -> String;
}

/// One reversible change to persistent state.
#[derive(Debug)]
pub enum Mutation {
    CreateKey(CreateKey),
    SetValue(SetValue),
    DeleteValue(DeleteValue),
    CreateDir(CreateDir),
    CopyTree(CopyTree),
    WriteFile(WriteFile),
    DeletePath(DeletePath),
    SchedulePendingRemoval(SchedulePendingRemoval),
    RemovePendingRemovals(RemovePendingRemovals),
}

impl Mutation {
    pub fn create_key(key: impl Into<String>) -> Self {
        Self::CreateKey(CreateKey {
            key: key.into(),
            created: Vec::new(),
        })
    }

    pub fn set_value(
        key: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<KeyValue>,
    ) -> Self {
        Self::SetValue(SetValue {
            key: key.into(),
            name: name.into(),
            value: value.into(),
            overwrite: true,
            prior: None,
        })
    }

    /// Writes the value only when it is absent; an existing value of the same
    /// kind is left untouched.
    pub fn set_value_if_absent(
        key: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<KeyValue>,
    ) -> Self {
        Self::SetValue(SetValue {
            key: key.into(),
            name: name.into(),
            value: value.into(),
            overwrite: false,
            prior: None,
        })
    }

    pub fn delete_value(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DeleteValue(DeleteValue {
            key: key.into(),
            name: name.into(),
            removed: None,
        })
    }

    pub fn create_dir(path: impl Into<PathBuf>) -> Self {
        Self::CreateDir(CreateDir {
            path: path.into(),
            created: Vec::new(),
        })
    }

    pub fn copy_tree(source: impl Into<PathBuf>, dest: impl Into<PathBuf>, mode: CopyMode) -> Self {
        Self::CopyTree(CopyTree {
            source: source.into(),
            dest: dest.into(),
            mode,
            undo: None,
        })
    }

    pub fn write_file(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self::WriteFile(WriteFile {
            path: path.into(),
            contents: contents.into(),
            undo: None,
        })
    }

    /// Deletes a path after moving it to the backup directory.
    pub fn delete_path(path: impl Into<PathBuf>) -> Self {
        Self::DeletePath(DeletePath {
            path: path.into(),
            reversible: true,
            undo: None,
        })
    }

    /// Deletes a path outright. This cannot be rolled back and belongs at
    /// the end of a sequence.
    pub fn delete_path_irreversible(path: impl Into<PathBuf>) -> Self {
        Self::DeletePath(DeletePath {
            path: path.into(),
            reversible: false,
            undo: None,
        })
    }

    pub fn schedule_pending_removal(path: impl Into<PathBuf>) -> Self {
        Self::SchedulePendingRemoval(SchedulePendingRemoval {
            path: path.into(),
            added: false,
        })
    }

    pub fn remove_pending_removals(prefix: impl Into<PathBuf>) -> Self {
        Self::RemovePendingRemovals(RemovePendingRemovals {
            prefix: prefix.into(),
            removed: None,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateKey(_) => "create_key",
            Self::SetValue(_) => "set_value",
            Self::DeleteValue(_) => "delete_value",
            Self::CreateDir(_) => "create_dir",
            Self::CopyTree(_) => "copy_tree",
            Self::WriteFile(_) => "write_file",
            Self::DeletePath(_) => "delete_path",
            Self::SchedulePendingRemoval(_) => "schedule_pending_removal",
            Self::RemovePendingRemovals(_) => "remove_pending_removals",
        }
    }

    pub fn target(&self) -> String {
        self.as_reversible().target()
    }

    pub fn is_reversible(&self) -> bool {
        !matches!(self, Self::DeletePath(delete) if !delete.reversible)
    }

    pub fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        self.as_reversible_mut().apply(env)
    }

    pub fn rollback(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        self.as_reversible_mut().rollback(env)
    }

    fn as_reversible(&self) -> &dyn Reversible {
        match self {
            Self::CreateKey(inner) => inner,
            Self::SetValue(inner) => inner,
            Self::DeleteValue(inner) => inner,
            Self::CreateDir(inner) => inner,
            Self::CopyTree(inner) => inner,
            Self::WriteFile(inner) => inner,
            Self::DeletePath(inner) => inner,
            Self::SchedulePendingRemoval(inner) => inner,
            Self::RemovePendingRemovals(inner) => inner,
        }
    }

    fn as_reversible_mut(&mut self) -> &mut dyn Reversible {
        match self {
            Self::CreateKey(inner) => inner,
            Self::SetValue(inner) => inner,
            Self::DeleteValue(inner) => inner,
            Self::CreateDir(inner) => inner,
            Self::CopyTree(inner) => inner,
            Self::WriteFile(inner) => inner,
            Self::DeletePath(inner) => inner,
            Self::SchedulePendingRemoval(inner) => inner,
            Self::RemovePendingRemovals(inner) => inner,
        }
    }
}

/// Creates a key and any missing ancestors.
#[derive(Debug)]
pub struct CreateKey {
    key: String,
    created: Vec<String>,
}

impl Reversible for CreateKey {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        for ancestor in RegistryStore::key_ancestry(&self.key)? {
            match env.registry().create_key(&ancestor) {
                Ok(true) => self.created.push(ancestor),
                Ok(false) => {}
                Err(err) => {
                    if let Err(undo_err) = self.rollback(env) {
                        warn!(key = %self.key, error = %undo_err, "failed to undo partial key creation");
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        while let Some(key) = self.created.pop() {
            if !env.registry().delete_key_if_empty(&key)? {
                warn!(key = %key, "created key is no longer empty, leaving it in place");
            }
        }
        Ok(())
    }

    fn target(&self) -> String {
        self.key.clone()
    }
}

#[derive(Debug)]
enum PriorValue {
    Absent,
    Present(KeyValue),
}

/// Writes a named value under an existing key.
#[derive(Debug)]
pub struct SetValue {
    key: String,
    name: String,
    value: KeyValue,
    overwrite: bool,
    prior: Option<PriorValue>,
}

impl Reversible for SetValue {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        let existing = env.registry().read_value(&self.key, &self.name)?;
        if let Some(existing) = &existing {
            if !self.overwrite {
                if !existing.same_kind(&self.value) {
                    return Err(MutationError::IncompatibleValue {
                        key: self.key.clone(),
                        name: self.name.clone(),
                        existing: existing.clone(),
                        requested: self.value.clone(),
                    });
                }
                debug!(key = %self.key, name = %self.name, "value already present, leaving unchanged");
                return Ok(());
            }
        }

        env.registry()
            .set_value(&self.key, &self.name, self.value.clone())?;
        self.prior = Some(match existing {
            Some(value) => PriorValue::Present(value),
            None => PriorValue::Absent,
        });
        Ok(())
    }

    fn rollback(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        match self.prior.take() {
            None => Ok(()),
            Some(PriorValue::Absent) => {
                env.registry().delete_value(&self.key, &self.name)?;
                Ok(())
            }
            Some(PriorValue::Present(value)) => {
                env.registry().set_value(&self.key, &self.name, value)?;
                Ok(())
            }
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.key, self.name)
    }
}

/// Removes a named value, keeping it for rollback.
#[derive(Debug)]
pub struct DeleteValue {
    key: String,
    name: String,
    removed: Option<KeyValue>,
}

impl Reversible for DeleteValue {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        self.removed = env.registry().delete_value(&self.key, &self.name)?;
        Ok(())
    }

    fn rollback(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        if let Some(value) = self.removed.take() {
            env.registry().set_value(&self.key, &self.name, value)?;
        }
        Ok(())
    }

    fn target(&self) -> String {
        format!("{}:{}", self.key, self.name)
    }
}

/// Creates a directory and any missing parents.
#[derive(Debug)]
pub struct CreateDir {
    path: PathBuf,
    created: Vec<PathBuf>,
}

impl Reversible for CreateDir {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        let mut missing = self
            .path
            .ancestors()
            .take_while(|ancestor| !ancestor.as_os_str().is_empty() && !ancestor.exists())
            .map(Path::to_path_buf)
            .collect::<Vec<_>>();
        missing.reverse();

        for dir in missing {
            if let Err(source) = fs::create_dir(&dir) {
                if let Err(undo_err) = self.rollback(env) {
                    warn!(path = %self.path.display(), error = %undo_err, "failed to undo partial directory creation");
                }
                return Err(MutationError::io("creating directory", dir, source));
            }
            self.created.push(dir);
        }
        Ok(())
    }

    fn rollback(&mut self, _env: &MutationEnv) -> Result<(), MutationError> {
        while let Some(dir) = self.created.pop() {
            if !dir.exists() {
                continue;
            }
            let empty =
                dir_is_empty(&dir).map_err(|source| MutationError::io("reading", &dir, source))?;
            if !empty {
                warn!(path = %dir.display(), "created directory is no longer empty, leaving it in place");
                continue;
            }
            fs::remove_dir(&dir)
                .map_err(|source| MutationError::io("removing directory", &dir, source))?;
        }
        Ok(())
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyMode {
    /// Always replace the destination.
    Always,
    /// Skip the copy when the destination file already has identical contents.
    IfDifferent,
    /// Copy to the given alternate path when the destination is in use.
    NewNameIfInUse(PathBuf),
}

#[derive(Debug)]
struct CopyUndo {
    target: PathBuf,
    backup: Option<PathBuf>,
    copied: bool,
}

/// Copies a file or directory tree, backing up whatever it replaces.
#[derive(Debug)]
pub struct CopyTree {
    source: PathBuf,
    dest: PathBuf,
    mode: CopyMode,
    undo: Option<CopyUndo>,
}

impl CopyTree {
    /// Where the last successful apply wrote, which differs from the
    /// destination when the in-use alternate was taken.
    pub fn copied_to(&self) -> Option<&Path> {
        self.undo
            .as_ref()
            .filter(|undo| undo.copied)
            .map(|undo| undo.target.as_path())
    }
}

impl Reversible for CopyTree {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        if !path_exists(&self.source) {
            return Err(MutationError::MissingSource {
                path: self.source.clone(),
            });
        }

        if self.mode == CopyMode::IfDifferent {
            let identical = files_identical(&self.source, &self.dest)
                .map_err(|source| MutationError::io("comparing", &self.dest, source))?;
            if identical {
                debug!(dest = %self.dest.display(), "destination already up to date");
                return Ok(());
            }
        }

        let target = match &self.mode {
            CopyMode::NewNameIfInUse(alternate) if env.is_in_use(&self.dest) => {
                debug!(
                    dest = %self.dest.display(),
                    alternate = %alternate.display(),
                    "destination in use, copying to alternate name"
                );
                alternate.clone()
            }
            _ => self.dest.clone(),
        };

        let mut undo = CopyUndo {
            target: target.clone(),
            backup: None,
            copied: false,
        };
        if path_exists(&target) {
            let backup = env.reserve_backup_path(&target);
            move_path(&target, &backup)
                .map_err(|source| MutationError::io("backing up", &target, source))?;
            undo.backup = Some(backup);
        }
        undo.copied = true;
        self.undo = Some(undo);

        if let Err(source) = copy_path(&self.source, &target) {
            if let Err(undo_err) = self.rollback(env) {
                warn!(dest = %target.display(), error = %undo_err, "failed to undo partial copy");
            }
            return Err(MutationError::io("copying to", target, source));
        }
        Ok(())
    }

    fn rollback(&mut self, _env: &MutationEnv) -> Result<(), MutationError> {
        let Some(undo) = self.undo.take() else {
            return Ok(());
        };
        if undo.copied {
            remove_path(&undo.target)
                .map_err(|source| MutationError::io("removing", &undo.target, source))?;
        }
        if let Some(backup) = &undo.backup {
            move_path(backup, &undo.target)
                .map_err(|source| MutationError::io("restoring", &undo.target, source))?;
        }
        Ok(())
    }

    fn target(&self) -> String {
        format!("{} -> {}", self.source.display(), self.dest.display())
    }
}

#[derive(Debug)]
struct WriteUndo {
    backup: Option<PathBuf>,
}

/// Writes a file, backing up any previous contents.
#[derive(Debug)]
pub struct WriteFile {
    path: PathBuf,
    contents: Vec<u8>,
    undo: Option<WriteUndo>,
}

impl Reversible for WriteFile {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        let mut undo = WriteUndo { backup: None };
        if path_exists(&self.path) {
            let backup = env.reserve_backup_path(&self.path);
            move_path(&self.path, &backup)
                .map_err(|source| MutationError::io("backing up", &self.path, source))?;
            undo.backup = Some(backup);
        }
        self.undo = Some(undo);

        let written = match self.path.parent() {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
        .and_then(|()| fs::write(&self.path, &self.contents));
        if let Err(source) = written {
            if let Err(undo_err) = self.rollback(env) {
                warn!(path = %self.path.display(), error = %undo_err, "failed to undo partial write");
            }
            return Err(MutationError::io("writing", &self.path, source));
        }
        Ok(())
    }

    fn rollback(&mut self, _env: &MutationEnv) -> Result<(), MutationError> {
        let Some(undo) = self.undo.take() else {
            return Ok(());
        };
        remove_path(&self.path)
            .map_err(|source| MutationError::io("removing", &self.path, source))?;
        if let Some(backup) = &undo.backup {
            move_path(backup, &self.path)
                .map_err(|source| MutationError::io("restoring", &self.path, source))?;
        }
        Ok(())
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug)]
enum DeleteUndo {
    Restore(PathBuf),
    Irreversible,
}

/// Deletes a file or directory tree.
#[derive(Debug)]
pub struct DeletePath {
    path: PathBuf,
    reversible: bool,
    undo: Option<DeleteUndo>,
}

impl Reversible for DeletePath {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        if !path_exists(&self.path) {
            return Ok(());
        }

        if !self.reversible {
            remove_path(&self.path)
                .map_err(|source| MutationError::io("deleting", &self.path, source))?;
            self.undo = Some(DeleteUndo::Irreversible);
            return Ok(());
        }

        let backup = env.reserve_backup_path(&self.path);
        if let Err(source) = move_path(&self.path, &backup) {
            if path_exists(&backup) {
                self.undo = Some(DeleteUndo::Restore(backup));
                if let Err(undo_err) = self.rollback(env) {
                    warn!(path = %self.path.display(), error = %undo_err, "failed to undo partial delete");
                }
            }
            return Err(MutationError::io("deleting", &self.path, source));
        }
        self.undo = Some(DeleteUndo::Restore(backup));
        Ok(())
    }

    fn rollback(&mut self, _env: &MutationEnv) -> Result<(), MutationError> {
        match self.undo.take() {
            None => Ok(()),
            Some(DeleteUndo::Restore(backup)) => move_path(&backup, &self.path)
                .map_err(|source| MutationError::io("restoring", &self.path, source)),
            Some(DeleteUndo::Irreversible) => Err(MutationError::Irreversible {
                path: self.path.clone(),
            }),
        }
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// Adds a deferred-removal marker for a path.
#[derive(Debug)]
pub struct SchedulePendingRemoval {
    path: PathBuf,
    added: bool,
}

impl Reversible for SchedulePendingRemoval {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        self.added = env.pending().add(&self.path)?;
        Ok(())
    }

    fn rollback(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        if std::mem::take(&mut self.added) {
            env.pending().remove(&self.path)?;
        }
        Ok(())
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

/// Drops every deferred-removal marker at or below a prefix, so a reboot
/// does not delete freshly installed files.
#[derive(Debug)]
pub struct RemovePendingRemovals {
    prefix: PathBuf,
    removed: Option<Vec<PathBuf>>,
}

impl Reversible for RemovePendingRemovals {
    fn apply(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        let removed = env.pending().remove_under(&self.prefix)?;
        if !removed.is_empty() {
            debug!(prefix = %self.prefix.display(), count = removed.len(), "removed pending removals");
        }
        self.removed = Some(removed);
        Ok(())
    }

    fn rollback(&mut self, env: &MutationEnv) -> Result<(), MutationError> {
        if let Some(removed) = self.removed.take() {
            if !removed.is_empty() {
                env.pending().restore(&removed)?;
            }
        }
        Ok(())
    }

    fn target(&self) -> String {
        self.prefix.display().to_string()
    }
}
