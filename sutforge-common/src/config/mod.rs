//! Configuration primitives for SUT Forge.
//!
//! This module provides the building blocks the settings layer is made of:
//! - Environment variable parsing with type safety
//! - The legacy INI reader
//! - Closed section schemas and their validation
//! - Source tracking for debugging

pub mod env;
pub mod legacy;
pub mod sections;
pub mod source;

pub use env::{ENV_PREFIX, EnvError, EnvParser, override_var_name};
pub use legacy::{LEGACY_FILENAME, LegacyError, LegacyReader};
pub use sections::{OptionKind, OptionSpec, SECTIONS, SectionSchema};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
