//! `UndoQuantum` — one transaction's worth of undo actions.
//!
//! A stack of reversible actions bound to one transaction, allocated in a Pool.

use std::rc::Rc;

use crate::pool::{Pool, PoolSlice};

/// One reversible action registered against an undo quantum. `undo()` is
/// invoked in reverse registration order when the owning transaction aborts;
/// `release()` is invoked in forward order when it commits. Both must release
/// any resources the action still holds ("UndoActions
/// must have released all memory after undo() is called").
pub trait UndoAction {
    fn undo(&mut self);
    fn release(&mut self);
}

/// An interested party notified once, after all of a quantum's actions have
/// been released.
pub trait ReleaseInterest {
    /// Returns `true` and marks this interest as registered for `token` if it
    /// was not already registered for it. Used by `register_undo_action` to
    /// avoid double-registering the same interest within one quantum.
    fn is_new_release_interest(&self, token: i64) -> bool;

    fn notify_quantum_release(&self);
}

/// A stack of reversible actions bound to one transaction token, backed by a
/// dedicated [`Pool`] that actions may use for scratch byte storage.
pub struct UndoQuantum {
    token: i64,
    pool: Pool,
    actions: Vec<Box<dyn UndoAction>>,
    interests: Vec<Rc<dyn ReleaseInterest>>,
}

impl UndoQuantum {
    pub fn new(token: i64, pool: Pool) -> Self {
        Self {
            token,
            pool,
            actions: Vec::new(),
            interests: Vec::new(),
        }
    }

    pub fn token(&self) -> i64 {
        self.token
    }

    /// Register an action, optionally tracking an interest. The interest is
    /// appended only if [`ReleaseInterest::is_new_release_interest`] reports
    /// it hasn't already been registered for this quantum's token.
    pub fn register_undo_action(
        &mut self,
        action: Box<dyn UndoAction>,
        interest: Option<Rc<dyn ReleaseInterest>>,
    ) {
        self.actions.push(action);
        if let Some(interest) = interest {
            if interest.is_new_release_interest(self.token) {
                self.interests.push(interest);
            }
        }
    }

    /// Like [`Self::register_undo_action`], but registers `interest`
    /// unconditionally — used when the caller has already de-duplicated
    /// interests itself (the original's `registerSynchronizedUndoAction`).
    pub fn register_synchronized_undo_action(
        &mut self,
        action: Box<dyn UndoAction>,
        interest: Option<Rc<dyn ReleaseInterest>>,
    ) {
        self.actions.push(action);
        if let Some(interest) = interest {
            self.interests.push(interest);
        }
    }

    /// Remove a previously-registered interest if present.
    pub fn unregister_release_interest(&mut self, interest: &Rc<dyn ReleaseInterest>) {
        self.interests.retain(|i| !Rc::ptr_eq(i, interest));
    }

    /// Allocate scratch bytes for an action from this quantum's Pool.
    pub fn allocate_action(&mut self, size: usize) -> PoolSlice {
        self.pool.allocate(size)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut Pool {
        &mut self.pool
    }

    pub fn allocated_memory(&self) -> usize {
        self.pool.allocated_memory()
    }

    #[cfg(test)]
    pub(crate) fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Undo this quantum: invoke every action's `undo()` in reverse
    /// (most-recently-registered-first) order, then return the Pool so the
    /// log can recycle it.
    pub fn undo(mut self) -> Pool {
        for action in self.actions.iter_mut().rev() {
            action.undo();
        }
        self.pool
    }

    /// Release this quantum: invoke every action's `release()` in forward
    /// (registration) order, then notify every registered interest exactly
    /// once, then return the Pool for recycling.
    pub fn release(mut self) -> Pool {
        for action in self.actions.iter_mut() {
            action.release();
        }
        for interest in &self.interests {
            interest.notify_quantum_release();
        }
        self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct RecordingAction {
        label: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl UndoAction for RecordingAction {
        fn undo(&mut self) {
            self.log.borrow_mut().push(format!("undo:{}", self.label));
        }
        fn release(&mut self) {
            self.log.borrow_mut().push(format!("release:{}", self.label));
        }
    }

    #[test]
    fn undo_runs_lifo() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut q = UndoQuantum::new(1, Pool::new(4096, 1));
        for label in ["A", "B", "C"] {
            q.register_undo_action(
                Box::new(RecordingAction {
                    label,
                    log: log.clone(),
                }),
                None,
            );
        }
        let _pool = q.undo();
        assert_eq!(
            *log.borrow(),
            vec!["undo:C".to_string(), "undo:B".to_string(), "undo:A".to_string()]
        );
    }

    #[test]
    fn release_runs_fifo_then_notifies() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut q = UndoQuantum::new(1, Pool::new(4096, 1));
        for label in ["A", "B", "C"] {
            q.register_undo_action(
                Box::new(RecordingAction {
                    label,
                    log: log.clone(),
                }),
                None,
            );
        }
        let _pool = q.release();
        assert_eq!(
            *log.borrow(),
            vec![
                "release:A".to_string(),
                "release:B".to_string(),
                "release:C".to_string()
            ]
        );
    }
}
