use serde::Serialize;
use std::fmt;

/// Observable lifecycle of the managed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Initialized,
    Starting,
    Started,
    Stopping,
}

impl LifecycleState {
    pub fn is_initialized(&self) -> bool {
        matches!(
            self,
            LifecycleState::Initialized | LifecycleState::Starting | LifecycleState::Started
        )
    }

    /// Settled states are the ones no operation is currently moving away from
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            LifecycleState::Uninitialized | LifecycleState::Initialized | LifecycleState::Started
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}
