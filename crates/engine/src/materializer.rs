//! Bounded "wait until the object exists" retries.
//!
//! A [`MaterializeTask`] carries a target, the action to run once the target
//! resolves, and how many attempts it has left. The engine makes one attempt
//! per update event and re-registers the task while the answer is
//! [`Attempt::Pending`].

use formsync_common::FormId;

/// Outcome of one resolution attempt.
#[derive(Debug, PartialEq)]
pub enum Attempt<A> {
    /// The target resolved: run `action` now.
    Resolved { target: FormId, action: A },
    /// Not yet; schedule the returned task for the next attempt.
    Pending(MaterializeTask<A>),
    /// Budget spent. The action is dropped.
    Exhausted { target: FormId, attempts: u32 },
}

/// One deferred action waiting for its target.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeTask<A> {
    target: FormId,
    action: A,
    budget: u32,
    remaining: u32,
}

impl<A> MaterializeTask<A> {
    pub fn target(&self) -> FormId {
        self.target
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Record one attempt. `ready` is whether the target resolved this time.
    pub fn attempt(mut self, ready: bool) -> Attempt<A> {
        if ready {
            return Attempt::Resolved {
                target: self.target,
                action: self.action,
            };
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            Attempt::Pending(self)
        } else {
            Attempt::Exhausted {
                target: self.target,
                attempts: self.budget,
            }
        }
    }
}

/// Hands out [`MaterializeTask`]s with a fixed attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredMaterializer {
    max_attempts: u32,
}

impl DeferredMaterializer {
    pub const DEFAULT_ATTEMPTS: u32 = 120;

    /// A zero budget still allows one attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn request<A>(&self, target: FormId, action: A) -> MaterializeTask<A> {
        tracing::trace!(%target, budget = self.max_attempts, "waiting for object to materialize");
        MaterializeTask {
            target,
            action,
            budget: self.max_attempts,
            remaining: self.max_attempts,
        }
    }
}

impl Default for DeferredMaterializer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: FormId = FormId(0x0001_f00d);

    #[test]
    fn resolves_immediately() {
        let task = DeferredMaterializer::default().request(TARGET, "open");
        assert_eq!(
            task.attempt(true),
            Attempt::Resolved { target: TARGET, action: "open" }
        );
    }

    #[test]
    fn exhausts_after_budget() {
        let m = DeferredMaterializer::new(3);
        let mut task = m.request(TARGET, ());
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match task.attempt(false) {
                Attempt::Pending(next) => task = next,
                other => break other,
            }
        };
        assert_eq!(attempts, 3);
        assert_eq!(outcome, Attempt::Exhausted { target: TARGET, attempts: 3 });
    }

    #[test]
    fn resolves_on_last_attempt() {
        let m = DeferredMaterializer::new(2);
        let Attempt::Pending(task) = m.request(TARGET, 7).attempt(false) else {
            panic!("expected a retry");
        };
        assert_eq!(task.remaining(), 1);
        assert!(matches!(task.attempt(true), Attempt::Resolved { action: 7, .. }));
    }

    #[test]
    fn zero_budget_is_one_attempt() {
        let m = DeferredMaterializer::new(0);
        assert_eq!(m.max_attempts(), 1);
        assert!(matches!(
            m.request(TARGET, ()).attempt(false),
            Attempt::Exhausted { attempts: 1, .. }
        ));
    }
}
