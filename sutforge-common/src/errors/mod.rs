//! Error catalog and definitions for SUT Forge
//!
//! | Range      | Category    | Description                               |
//! |------------|-------------|-------------------------------------------|
//! | E001-E099  | Config      | Settings files, sections and overrides    |
//! | E100-E199  | Factory     | Registry lookups and entity creation      |
//! | E200-E299  | Transport   | Hammer CLI, SSH and HTTP API calls        |
//! | E300-E399  | Task        | Polling waits on SUT tasks and jobs       |
//! | E400-E499  | Setup       | Composed setup scenarios and manifests    |
//! | E500-E599  | Harness     | Runner surface, scoped helpers, internals |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
