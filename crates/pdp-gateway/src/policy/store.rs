//! Current-policy holder with atomic replacement.
//!
//! Readers clone the `Arc` out of the lock and evaluate against that snapshot
//! lock-free; a reload compiles first and swaps the pointer only on success.
//! Sessions already holding a snapshot never see the new module. Revisions
//! are assigned under the write lock, so the installed revision only grows.

use std::sync::{Arc, PoisonError, RwLock};

use pdp_core::{compile_all, CompileError, PolicyModule};

/// A compiled module plus the revision it was installed as.
#[derive(Debug)]
pub struct PolicySnapshot {
    pub revision: u64,
    pub module: Arc<PolicyModule>,
}

pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyStore {
    /// Install an already-compiled module as revision 1.
    pub fn new(module: PolicyModule) -> Self {
        Self {
            current: RwLock::new(Arc::new(PolicySnapshot {
                revision: 1,
                module: Arc::new(module),
            })),
        }
    }

    /// Compile `sources` into the initial module.
    pub fn from_sources<S: AsRef<str>>(sources: &[S]) -> Result<Self, CompileError> {
        let module = compile_all(sources.iter().map(AsRef::as_ref))?;
        Ok(Self::new(module))
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        // The guarded value is a plain pointer; a poisoned lock still holds a
        // complete snapshot.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn revision(&self) -> u64 {
        self.snapshot().revision
    }

    /// Replace the policy with a single source.
    pub fn reload(&self, source: &str) -> Result<Arc<PolicySnapshot>, CompileError> {
        self.reload_all(&[source])
    }

    /// Compile `sources` and swap them in. On failure the active module is
    /// untouched.
    pub fn reload_all<S: AsRef<str>>(
        &self,
        sources: &[S],
    ) -> Result<Arc<PolicySnapshot>, CompileError> {
        let module = match compile_all(sources.iter().map(AsRef::as_ref)) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(
                    active_revision = self.revision(),
                    error = %e,
                    "policy reload rejected; keeping active policy"
                );
                return Err(e);
            }
        };

        let module = Arc::new(module);
        let snapshot = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let snapshot = Arc::new(PolicySnapshot {
                revision: guard.revision + 1,
                module,
            });
            *guard = Arc::clone(&snapshot);
            snapshot
        };

        tracing::info!(
            revision = snapshot.revision,
            rules = snapshot.module.rule_count(),
            "policy reloaded"
        );
        Ok(snapshot)
    }
}
