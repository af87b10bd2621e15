//! Mock collaborators for integration testing
//!
//! - `MockHomeAssistant`: axum server speaking the Home Assistant REST API
//! - `RecordingRemote`: in-memory RemoteControl that records every call

#![allow(dead_code)]

pub mod home_assistant;
pub mod remote;

pub use home_assistant::MockHomeAssistant;
pub use remote::{device, track, Call, RecordingRemote};
