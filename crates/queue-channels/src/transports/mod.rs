//! Queue transport implementations.
//!
//! This module contains concrete implementations of the `QueueTransport`
//! trait for different backends.

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemTransport;
pub use memory::InMemoryTransport;
