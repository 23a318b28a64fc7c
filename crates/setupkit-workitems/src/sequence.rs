use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::env::MutationEnv;
use crate::error::MutationError;
use crate::mutation::Mutation;

/// The mutation that stopped a sequence, with its position and cause.
#[derive(Debug, Error)]
#[error("mutation #{index} ({kind} {target}) failed: {source}")]
pub struct FailedAt {
    pub index: usize,
    pub kind: &'static str,
    pub target: String,
    #[source]
    pub source: MutationError,
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error(transparent)]
    Failed(#[from] FailedAt),

    #[error("mutation sequence was already applied; build a new one")]
    Spent,
}

impl SequenceError {
    pub fn failed_at(&self) -> Option<&FailedAt> {
        match self {
            Self::Failed(failed) => Some(failed),
            Self::Spent => None,
        }
    }
}

/// A compensating action that itself failed.
#[derive(Debug)]
pub struct RollbackFailure {
    pub index: usize,
    pub kind: &'static str,
    pub target: String,
    pub error: MutationError,
}

#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Indices whose rollback ran, in the order it ran.
    pub rolled_back: Vec<usize>,
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered, single-use batch of mutations with positional rollback.
///
/// The caller decides ordering; dependencies between mutations are not
/// inferred.
#[derive(Debug)]
pub struct MutationSequence {
    env: MutationEnv,
    mutations: Vec<Mutation>,
    last_applied: Option<usize>,
    attempted: bool,
}

impl MutationSequence {
    pub fn new(env: MutationEnv) -> Self {
        Self {
            env,
            mutations: Vec::new(),
            last_applied: None,
            attempted: false,
        }
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Index of the last mutation that applied successfully, `None` before
    /// anything applied and after rollback.
    pub fn last_applied_index(&self) -> Option<usize> {
        self.last_applied
    }

    /// Applies every mutation in order, stopping at the first failure.
    ///
    /// Nothing is undone here; call [`rollback`](Self::rollback) to unwind
    /// what was applied.
    pub fn apply(&mut self) -> Result<(), SequenceError> {
        if self.attempted {
            return Err(SequenceError::Spent);
        }
        self.attempted = true;

        for (index, mutation) in self.mutations.iter_mut().enumerate() {
            debug!(index, kind = mutation.kind(), target = %mutation.target(), "applying mutation");
            if let Err(source) = mutation.apply(&self.env) {
                error!(
                    index,
                    kind = mutation.kind(),
                    target = %mutation.target(),
                    error = %source,
                    "mutation failed"
                );
                return Err(FailedAt {
                    index,
                    kind: mutation.kind(),
                    target: mutation.target(),
                    source,
                }
                .into());
            }
            self.last_applied = Some(index);
        }

        info!(count = self.mutations.len(), "mutation sequence applied");
        Ok(())
    }

    /// Undoes applied mutations newest first, attempting every one even when
    /// some fail. A second call is a no-op.
    pub fn rollback(&mut self) -> RollbackReport {
        let mut report = RollbackReport::default();
        let Some(last) = self.last_applied.take() else {
            return report;
        };

        for index in (0..=last).rev() {
            let mutation = &mut self.mutations[index];
            report.rolled_back.push(index);
            match mutation.rollback(&self.env) {
                Ok(()) => {
                    debug!(index, kind = mutation.kind(), target = %mutation.target(), "rolled back mutation");
                }
                Err(err) => {
                    warn!(
                        index,
                        kind = mutation.kind(),
                        target = %mutation.target(),
                        error = %err,
                        "rollback of mutation failed"
                    );
                    report.failures.push(RollbackFailure {
                        index,
                        kind: mutation.kind(),
                        target: mutation.target(),
                        error: err,
                    });
                }
            }
        }

        info!(
            rolled_back = report.rolled_back.len(),
            failures = report.failures.len(),
            "mutation sequence rolled back"
        );
        report
    }
}
