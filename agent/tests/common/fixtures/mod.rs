//! Stub node runtime and snapshot backend for driving the HTTP surface

#![allow(dead_code)]

pub mod stub_node;

pub use stub_node::{StubBackend, StubRuntime};
