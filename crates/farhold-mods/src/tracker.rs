//! Per-mod registration tracking.
//!
//! Every command, event hook, and scheduled task a mod registers with the
//! host leaves one undo action here. Teardown replays the actions in
//! insertion order; one failing action never blocks the rest.

use std::sync::Mutex;

use crate::host::Registration;

/// Ordered list of undo actions for one mod's host-side registrations.
#[derive(Default)]
pub struct RegistrationTracker {
    actions: Mutex<Vec<Registration>>,
}

impl RegistrationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one undo action.
    pub fn track(&self, action: Registration) {
        self.lock().push(action);
    }

    /// Number of tracked registrations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run every undo action in insertion order, then empty the list.
    ///
    /// Individual failures are logged and skipped. Safe to call repeatedly;
    /// with nothing tracked it is a no-op.
    pub fn clear_all(&self, mod_id: &str) {
        let drained: Vec<Registration> = std::mem::take(&mut *self.lock());
        for action in drained {
            if let Err(e) = action() {
                tracing::warn!(mod_id = %mod_id, "failed to undo registration: {e}");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        self.actions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
