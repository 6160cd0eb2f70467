//! Up/Down status tracking for managed subsystems.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle state of a subsystem.
///
/// Every subsystem starts `Down`. A successful setup moves it to `Up` and a
/// teardown moves it back to `Down`. A subsystem that is disabled by
/// configuration may complete setup without ever becoming `Up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Down,
    Up,
}

impl Status {
    pub fn is_up(self) -> bool {
        matches!(self, Status::Up)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Down => f.write_str("down"),
            Status::Up => f.write_str("up"),
        }
    }
}

/// Thread-safe status cell owned by a subsystem.
///
/// Only the owning subsystem flips the flag (from its setup and teardown);
/// anyone holding a reference may read it.
#[derive(Debug, Default)]
pub struct StatusFlag {
    up: AtomicBool,
}

impl StatusFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Status {
        if self.up.load(Ordering::Acquire) {
            Status::Up
        } else {
            Status::Down
        }
    }

    pub fn set(&self, status: Status) {
        self.up.store(status.is_up(), Ordering::Release);
    }

    pub fn mark_up(&self) {
        self.set(Status::Up);
    }

    pub fn mark_down(&self) {
        self.set(Status::Down);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_starts_down() {
        let flag = StatusFlag::new();
        assert_eq!(flag.get(), Status::Down);
        assert!(!flag.get().is_up());
    }

    #[test]
    fn test_flag_transitions() {
        let flag = StatusFlag::new();
        flag.mark_up();
        assert_eq!(flag.get(), Status::Up);
        flag.mark_down();
        assert_eq!(flag.get(), Status::Down);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Up.to_string(), "up");
        assert_eq!(Status::Down.to_string(), "down");
    }
}
