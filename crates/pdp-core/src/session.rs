//! Per-request evaluation session.
//!
//! Lifecycle: `Created -> Binding -> Evaluating -> Completed`. Sessions are
//! single-use; once completed every evaluation attempt fails with
//! `SessionClosed`. The session pins one `Arc<PolicyModule>`, so a reload that
//! lands mid-request is never observed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{EvalError, EvalErrorKind};
use crate::module::PolicyModule;
use crate::value::{Document, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Binding,
    Evaluating,
    Completed,
}

/// Bounds applied while binding facts and evaluating rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Maximum rule frames the entry rule's reference chain may need.
    pub max_depth: usize,
    /// Maximum number of values in the fact document.
    pub max_fact_nodes: usize,
    /// Maximum nesting of the fact document.
    pub max_fact_depth: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_fact_nodes: 10_000,
            max_fact_depth: 32,
        }
    }
}

/// Cancellation handle: an optional deadline plus a manual cancel flag.
/// Clones share the flag, so another thread can abort an evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Never expires unless cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with `DeadlineExceeded` once cancelled or past the deadline.
    pub fn check(&self) -> Result<(), EvalError> {
        if self.is_cancelled() {
            return Err(EvalError::new(
                EvalErrorKind::DeadlineExceeded,
                "evaluation deadline exceeded or cancelled",
            ));
        }
        Ok(())
    }
}

type MemoKey = (String, String);

/// Transient evaluation context for one authorization request.
#[derive(Debug)]
pub struct Session {
    module: Arc<PolicyModule>,
    facts: Document,
    signal: CancelSignal,
    limits: EvalLimits,
    state: Mutex<SessionState>,
    memo: Mutex<HashMap<MemoKey, Value>>,
}

impl Session {
    pub fn new(module: Arc<PolicyModule>, facts: Document) -> Self {
        Self {
            module,
            facts,
            signal: CancelSignal::new(),
            limits: EvalLimits::default(),
            state: Mutex::new(SessionState::Created),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn module(&self) -> &Arc<PolicyModule> {
        &self.module
    }

    pub fn facts(&self) -> &Document {
        &self.facts
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub fn limits(&self) -> &EvalLimits {
        &self.limits
    }

    pub fn state(&self) -> SessionState {
        self.lock_state()
            .map(|s| *s)
            .unwrap_or(SessionState::Completed)
    }

    /// Validate the fact document. Idempotent once bound; a failed binding
    /// completes the session.
    pub fn bind(&self) -> Result<(), EvalError> {
        let mut state = self.lock_state()?;
        match *state {
            SessionState::Created => self.bind_locked(&mut state),
            SessionState::Binding | SessionState::Evaluating => Ok(()),
            SessionState::Completed => Err(EvalError::session_closed()),
        }
    }

    /// Terminal transition.
    pub fn complete(&self) {
        if let Ok(mut state) = self.lock_state() {
            *state = SessionState::Completed;
        }
        if let Ok(mut memo) = self.memo.lock() {
            memo.clear();
        }
    }

    /// Move into `Evaluating`, binding first if needed.
    pub(crate) fn enter_evaluation(&self) -> Result<(), EvalError> {
        let mut state = self.lock_state()?;
        match *state {
            SessionState::Created => {
                self.bind_locked(&mut state)?;
                *state = SessionState::Evaluating;
                Ok(())
            }
            SessionState::Binding => {
                *state = SessionState::Evaluating;
                Ok(())
            }
            SessionState::Evaluating => Ok(()),
            SessionState::Completed => Err(EvalError::session_closed()),
        }
    }

    pub(crate) fn memo_get(&self, namespace: &str, rule: &str) -> Option<Value> {
        // A poisoned memo only costs recomputation.
        let memo = self.memo.lock().ok()?;
        memo.get(&(namespace.to_string(), rule.to_string())).cloned()
    }

    pub(crate) fn memo_put(&self, namespace: &str, rule: &str, value: &Value) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert((namespace.to_string(), rule.to_string()), value.clone());
        }
    }

    fn bind_locked(&self, state: &mut MutexGuard<'_, SessionState>) -> Result<(), EvalError> {
        **state = SessionState::Binding;
        let stats = self.facts.measure();
        let problem = if stats.nodes > self.limits.max_fact_nodes {
            Some(format!(
                "fact document has {} values (limit {})",
                stats.nodes, self.limits.max_fact_nodes
            ))
        } else if stats.depth > self.limits.max_fact_depth {
            Some(format!(
                "fact document nests {} levels (limit {})",
                stats.depth, self.limits.max_fact_depth
            ))
        } else {
            None
        };

        if let Some(msg) = problem {
            **state = SessionState::Completed;
            tracing::warn!(nodes = stats.nodes, depth = stats.depth, "fact binding rejected");
            return Err(EvalError::new(EvalErrorKind::InvalidFacts, msg));
        }
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, SessionState>, EvalError> {
        // Poisoned state means a logic bug; fail closed.
        self.state.lock().map_err(|_| EvalError::session_closed())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::compiler::compile;

    fn module() -> Arc<PolicyModule> {
        Arc::new(compile("package p\nr := true\n").unwrap())
    }

    #[test]
    fn lifecycle_transitions() {
        let s = Session::new(module(), Document::new().with("a", 1i64));
        assert_eq!(s.state(), SessionState::Created);
        s.bind().unwrap();
        assert_eq!(s.state(), SessionState::Binding);
        s.enter_evaluation().unwrap();
        assert_eq!(s.state(), SessionState::Evaluating);
        s.complete();
        assert_eq!(s.state(), SessionState::Completed);
        assert_eq!(s.enter_evaluation().unwrap_err().kind, EvalErrorKind::SessionClosed);
        assert_eq!(s.bind().unwrap_err().kind, EvalErrorKind::SessionClosed);
    }

    #[test]
    fn binding_enforces_limits() {
        let facts = Document::new().with("a", vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let s = Session::new(module(), facts).with_limits(EvalLimits {
            max_fact_nodes: 3,
            ..EvalLimits::default()
        });
        assert_eq!(s.bind().unwrap_err().kind, EvalErrorKind::InvalidFacts);
        assert_eq!(s.state(), SessionState::Completed);
    }

    #[test]
    fn cancel_signal_is_shared_between_clones() {
        let signal = CancelSignal::new();
        let remote = signal.clone();
        assert!(signal.check().is_ok());
        remote.cancel();
        assert_eq!(signal.check().unwrap_err().kind, EvalErrorKind::DeadlineExceeded);
    }

    #[test]
    fn expired_deadline_trips() {
        let signal = CancelSignal::with_deadline(Instant::now());
        assert!(signal.is_cancelled());
        assert!(!CancelSignal::with_timeout(Duration::from_secs(60)).is_cancelled());
    }
}
