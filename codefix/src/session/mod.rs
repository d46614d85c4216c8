// Core of the codefix daemon
// Shared between the daemon and CLI binaries

pub mod auth;
pub mod channel;
pub mod config;
pub mod daemon_client;
pub mod files;
pub mod lifecycle;
pub mod path_guard;
pub mod protocol;
pub mod registry;
