//! Virtual user lifecycle states

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one virtual user
///
/// `Created -> Starting -> Running -> Stopping -> Stopped`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum UserState {
    /// Constructed, not yet launched
    Created = 0,
    /// Running the start-up behavior
    Starting = 1,
    /// Executing tasks
    Running = 2,
    /// Stop observed; finishing the in-flight behavior, if any
    Stopping = 3,
    /// Done
    Stopped = 4,
}

impl UserState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => UserState::Created,
            1 => UserState::Starting,
            2 => UserState::Running,
            3 => UserState::Stopping,
            _ => UserState::Stopped,
        }
    }

    /// Whether the user is still doing (or about to do) work
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UserState::Starting | UserState::Running | UserState::Stopping
        )
    }
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserState::Created => "created",
            UserState::Starting => "starting",
            UserState::Running => "running",
            UserState::Stopping => "stopping",
            UserState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Lock-free view of a user's state, shared with the run handle
#[derive(Debug)]
pub struct UserStatus {
    user_id: usize,
    state: AtomicU8,
    /// Set once the user enters `Running`
    started: AtomicU8,
}

impl UserStatus {
    /// Status of a freshly created user
    pub fn new(user_id: usize) -> Self {
        Self {
            user_id,
            state: AtomicU8::new(UserState::Created as u8),
            started: AtomicU8::new(0),
        }
    }

    /// Owning user
    pub fn user_id(&self) -> usize {
        self.user_id
    }

    /// Current state
    pub fn get(&self) -> UserState {
        UserState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move forward to `next`; earlier states are ignored
    pub fn advance(&self, next: UserState) {
        self.state.fetch_max(next as u8, Ordering::SeqCst);
    }

    /// Move `from -> to` only if the user is currently in `from`
    pub fn transition(&self, from: UserState, to: UserState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether the user ever reached `Running`
    pub fn reached_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) == 1
    }

    /// Leave `Starting` once the start-up behavior has returned
    ///
    /// A user whose run was stopped meanwhile goes straight to `Stopping`
    /// and never reports `Running`.
    pub(crate) fn finish_startup(&self, stopped: bool) {
        if !stopped && self.transition(UserState::Starting, UserState::Running) {
            self.started.store(1, Ordering::SeqCst);
        } else {
            self.advance(UserState::Stopping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_starts_created() {
        let status = UserStatus::new(3);
        assert_eq!(status.user_id(), 3);
        assert_eq!(status.get(), UserState::Created);
        assert!(!status.reached_running());
        assert!(!status.get().is_active());
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let status = UserStatus::new(0);
        status.advance(UserState::Stopping);
        status.advance(UserState::Running);
        assert_eq!(status.get(), UserState::Stopping);
    }

    #[test]
    fn test_transition_only_from_expected_state() {
        let status = UserStatus::new(0);
        assert!(!status.transition(UserState::Running, UserState::Stopping));
        status.advance(UserState::Starting);
        status.finish_startup(false);
        assert_eq!(status.get(), UserState::Running);
        assert!(status.reached_running());
        assert!(status.transition(UserState::Running, UserState::Stopping));
        assert_eq!(status.get(), UserState::Stopping);
    }

    #[test]
    fn test_stop_during_startup_skips_running() {
        let status = UserStatus::new(0);
        status.advance(UserState::Starting);
        status.finish_startup(true);
        assert_eq!(status.get(), UserState::Stopping);
        assert!(!status.reached_running());

        // Stop requested from outside while the start-up behavior was in flight
        let status = UserStatus::new(1);
        status.advance(UserState::Starting);
        assert!(status.transition(UserState::Starting, UserState::Stopping));
        status.finish_startup(false);
        assert_eq!(status.get(), UserState::Stopping);
        assert!(!status.reached_running());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(UserState::Running.to_string(), "running");
        assert!(UserState::Stopping.is_active());
        assert!(!UserState::Stopped.is_active());
    }
}
