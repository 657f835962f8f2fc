//! Shared foundation for SUT Forge.
//!
//! Value casts, the layered settings store, the error catalog, logging
//! bootstrap and the plain records every other layer passes around.

pub mod casts;
pub mod config;
pub mod errors;
pub mod logging;
pub mod settings;
pub mod testing;
pub mod types;
pub mod util;

pub use casts::{CastError, LogLevel};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
pub use settings::{
    ConfigError, ConfigureOptions, ServerSettings, Setting, Settings, SettingsNode,
    SharedFunctionSettings, SshClientSettings, configure,
};
pub use types::{
    Credentials, EntityHandle, Manifest, TargetKind, TaskHandle, TaskOutcome, TaskState,
};
pub use util::mask_sensitive_command;

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    testing::init_test_logging();
}
