//! SUT Forge: entity factories, transports and setup orchestration for
//! testing an infrastructure-management server.
//!
//! Layers, bottom up:
//!
//! - [`transport`]: API over HTTPS, hammer over SSH, and an in-memory SUT
//! - [`client`]: CRUD and domain actions over any transport
//! - [`factory`]: `make_<name>` builders filled from a table of defaults
//! - [`tasks`]: retries and waits on SUT background tasks
//! - [`setup`]: composed scenarios (content, provisioning, permissions)
//! - [`scoped`]: mutations that are undone on every exit path
//! - [`harness`]: hooks a test runner calls around the suite

pub mod client;
pub mod factory;
pub mod harness;
pub mod scoped;
pub mod setup;
pub mod tasks;
pub mod transport;

pub use client::{EntityClient, options};
pub use factory::{FactoryDispatcher, FactoryError, Overrides};
pub use harness::HarnessError;
pub use scoped::{Restore, ScopedError, scoped};
pub use setup::{SetupBundle, SetupError, SetupOrchestrator};
pub use tasks::{TaskError, TaskPoller};
pub use transport::{Transport, TransportError, TransportSet};

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    sutforge_common::testing::init_test_logging();
}
