// CleanupSet - resources released together, exactly once
//
// Members are released in reverse acquisition order. Each member runs in
// isolation: a panicking member is logged and the rest are still released.

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Member {
    label: String,
    release: Box<dyn FnOnce() + Send + 'static>,
}

impl Member {
    fn release(self) {
        let Member { label, release } = self;
        if catch_unwind(AssertUnwindSafe(release)).is_err() {
            tracing::error!(resource = %label, "Resource panicked while being released");
        } else {
            tracing::trace!(resource = %label, "Resource released");
        }
    }
}

#[derive(Default)]
struct CleanupState {
    disposed: bool,
    members: Vec<Member>,
}

/// Aggregate of acquired resources owned by one component.
///
/// `dispose` is idempotent and safe to race with itself: exactly one caller
/// releases the members. Adding to a disposed set releases the new member
/// immediately. Dropping the set disposes it.
#[derive(Default)]
pub struct CleanupSet {
    state: Mutex<CleanupState>,
}

impl CleanupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a release action. Returns `false` if the set was already disposed,
    /// in which case the action has already run.
    pub fn add<F>(&self, label: impl Into<String>, release: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let member = Member {
            label: label.into(),
            release: Box::new(release),
        };
        self.push(member)
    }

    /// Cancel `token` on disposal.
    pub fn add_token(&self, label: impl Into<String>, token: CancellationToken) -> bool {
        self.add(label, move || token.cancel())
    }

    /// Abort `task` on disposal.
    pub fn add_task<T>(&self, label: impl Into<String>, task: JoinHandle<T>) -> bool
    where
        T: Send + 'static,
    {
        self.add(label, move || task.abort())
    }

    /// Move every member of `other` into this set, keeping their order.
    ///
    /// `other` ends up empty but not disposed.
    pub fn absorb(&self, other: &CleanupSet) -> bool {
        let moved = std::mem::take(&mut other.state.lock().members);
        let mut state = self.state.lock();
        if state.disposed {
            drop(state);
            release_all(moved);
            return false;
        }
        state.members.extend(moved);
        true
    }

    /// Release every member, once. Returns `true` for the call that did it.
    pub fn dispose(&self) -> bool {
        let members = {
            let mut state = self.state.lock();
            if state.disposed {
                return false;
            }
            state.disposed = true;
            std::mem::take(&mut state.members)
        };

        tracing::debug!(resources = members.len(), "Disposing cleanup set");
        release_all(members);
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels of the members currently held, in acquisition order.
    pub fn labels(&self) -> Vec<String> {
        self.state
            .lock()
            .members
            .iter()
            .map(|m| m.label.clone())
            .collect()
    }

    fn push(&self, member: Member) -> bool {
        let mut state = self.state.lock();
        if state.disposed {
            drop(state);
            tracing::debug!(resource = %member.label, "Cleanup set already disposed, releasing immediately");
            member.release();
            return false;
        }
        state.members.push(member);
        true
    }
}

impl Drop for CleanupSet {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn release_all(members: Vec<Member>) {
    for member in members.into_iter().rev() {
        member.release();
    }
}
