use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

/// Lifecycle of a [`Scheduler`](crate::scheduler::Scheduler).
///
/// ```text
/// Uninitialized -> Initializing -> Initialized -> Starting -> Started
///                        ^                                      |
///                        |                                  Stopping
///                        +------------------------------ Stopped
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    #[default]
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Starting = 3,
    Started = 4,
    Stopping = 5,
    Stopped = 6,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Uninitialized => "uninitialized",
            Status::Initializing => "initializing",
            Status::Initialized => "initialized",
            Status::Starting => "starting",
            Status::Started => "started",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
        }
    }

    /// Human-readable description, used in logs.
    pub fn description(&self) -> &'static str {
        match self {
            Status::Uninitialized => "not initialized yet",
            Status::Initializing => "being initialized",
            Status::Initialized => "initialized",
            Status::Starting => "starting",
            Status::Started => "running",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
        }
    }

    /// Whether a transition is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Status::Initializing | Status::Starting | Status::Stopping
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validates a request to move from `current` into the transient status
/// `wanted`.
pub fn check_status(current: Status, wanted: Status) -> Result<(), CrawlError> {
    let refuse = |why: &str| {
        Err(CrawlError::InvalidState(format!(
            "cannot move from {current} to {wanted}: {why}"
        )))
    };

    if current.is_busy() {
        return refuse("scheduler is busy");
    }
    match wanted {
        Status::Initializing => {
            if current == Status::Started {
                return refuse("scheduler is running");
            }
        }
        Status::Starting => match current {
            Status::Uninitialized => return refuse("scheduler is not initialized"),
            Status::Started => return refuse("scheduler is already running"),
            Status::Stopped => return refuse("scheduler must be re-initialized"),
            _ => {}
        },
        Status::Stopping => {
            if current != Status::Started {
                return refuse("scheduler is not running");
            }
        }
        _ => return refuse("unsupported target status"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 7] = [
        Status::Uninitialized,
        Status::Initializing,
        Status::Initialized,
        Status::Starting,
        Status::Started,
        Status::Stopping,
        Status::Stopped,
    ];

    #[test]
    fn test_allowed_transitions() {
        let allowed: Vec<(Status, Status)> = ALL
            .iter()
            .flat_map(|&from| ALL.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| check_status(from, to).is_ok())
            .collect();

        assert_eq!(
            allowed,
            vec![
                (Status::Uninitialized, Status::Initializing),
                (Status::Initialized, Status::Initializing),
                (Status::Initialized, Status::Starting),
                (Status::Started, Status::Stopping),
                (Status::Stopped, Status::Initializing),
            ]
        );
    }

    #[test]
    fn test_busy_rejects_everything() {
        for busy in [Status::Initializing, Status::Starting, Status::Stopping] {
            for wanted in ALL {
                assert!(matches!(
                    check_status(busy, wanted),
                    Err(CrawlError::InvalidState(_))
                ));
            }
        }
    }

    #[test]
    fn test_display_and_numeric_values() {
        assert_eq!(Status::Started.to_string(), "started");
        assert_eq!(Status::Stopped as u8, 6);
        assert_eq!(Status::default(), Status::Uninitialized);
        assert_eq!(
            serde_json::to_string(&Status::Uninitialized).unwrap(),
            "\"uninitialized\""
        );
    }
}
