mod env;
mod error;
pub mod fs_utils;
mod mutation;
mod pending;
mod registry;
mod sequence;

pub use env::{InUseCheck, MutationEnv, NeverInUse};
pub use error::{MutationError, StoreError};
pub use mutation::{
    CopyMode, CopyTree, CreateDir, CreateKey, DeletePath, DeleteValue, Mutation,
    RemovePendingRemovals, SchedulePendingRemoval, SetValue, WriteFile,
};
pub use pending::PendingRemovals;
pub use registry::{KeyValue, RegistryStore};
pub use sequence::{FailedAt, MutationSequence, RollbackFailure, RollbackReport, SequenceError};

#[cfg(test)]
mod tests;
