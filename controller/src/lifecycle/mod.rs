//! Node lifecycle: init, start, stop, restart, reset and snapshot bootstrap

pub mod controller;
pub mod state;

pub use controller::NodeController;
pub use state::LifecycleState;
