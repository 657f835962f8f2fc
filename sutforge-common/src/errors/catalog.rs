//! Error Catalog for SUT Forge
//!
//! Every failure the harness can report maps onto one stable code in the
//! `SFG-Exxx` format. Each code carries a category, a message template and
//! remediation steps, so CI logs and the operator CLI can print the same
//! guidance regardless of which layer raised the error.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                               |
//! |------------|-------------|-------------------------------------------|
//! | E001-E099  | Config      | Settings files, sections and overrides    |
//! | E100-E199  | Factory     | Registry lookups and entity creation      |
//! | E200-E299  | Transport   | Hammer CLI, SSH and HTTP API calls        |
//! | E300-E399  | Task        | Polling waits on SUT tasks and jobs       |
//! | E400-E499  | Setup       | Composed setup scenarios and manifests    |
//! | E500-E599  | Harness     | Runner surface, scoped helpers, internals |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all harness error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// A required settings file or directory is missing
    ConfigMissing,
    /// One or more sections failed validation
    ConfigInvalid,
    /// A settings file could not be parsed
    ConfigParseError,
    /// A dotted path did not resolve in any provider
    ConfigUnknownPath,
    /// A raw value failed its cast
    ConfigCastError,
    /// An environment override has an invalid value
    ConfigEnvError,
    /// A section the caller depends on is not set
    ConfigSectionNotSet,

    // =========================================================================
    // Factory Errors (E100-E199)
    // =========================================================================
    /// Symbolic factory name is not registered
    UnknownFactory,
    /// The transport refused the create call
    FactoryFailure,
    /// Redirect chain loops back on itself
    FactoryRedirectLoop,
    /// No transport class matches the factory name
    FactoryClassNotFound,
    /// The transport namespace was dropped before the call
    FactoryTransportGone,

    // =========================================================================
    // Transport Errors (E200-E299)
    // =========================================================================
    /// Hammer exited with a non-zero status
    CliNonZeroExit,
    /// HTTP API answered with a non-2xx status
    HttpStatus,
    /// SSH connection could not be established
    SshConnectionFailed,
    /// Remote command exceeded the command timeout
    SshTimeout,
    /// Transport output could not be parsed
    TransportParse,
    /// The transport does not support the requested class or action
    TransportUnsupported,
    /// Network-level HTTP failure
    HttpRequestFailed,

    // =========================================================================
    // Task Errors (E300-E399)
    // =========================================================================
    /// A polling wait exceeded its deadline
    TaskTimeout,
    /// A task reached a terminal state other than success
    TaskFailed,
    /// No task matched the search within the outer budget
    TaskNotFound,

    // =========================================================================
    // Setup Errors (E400-E499)
    // =========================================================================
    /// Subscription was not found or has no quantity
    SetupSubscriptionNotFound,
    /// Requested permissions are not available on the SUT
    SetupPermissionMissing,
    /// Manifest could not be cloned or uploaded
    SetupManifestError,
    /// Manifest lock could not be acquired in time
    ManifestLockTimeout,
    /// A step returned a handle without the expected fields
    SetupEntityMissing,
    /// A verification step did not match
    AssertionMismatch,

    // =========================================================================
    // Harness Errors (E500-E599)
    // =========================================================================
    /// Test must be skipped
    SkipRequested,
    /// Marker named a section that does not exist
    UnknownSection,
    /// Worker could not be bound to a SUT host
    WorkerAlignmentFailed,
    /// SUT setting referenced by a scoped override does not exist
    ScopedSettingMissing,
    /// Scoped helper failed to restore captured state
    ScopedRestoreFailed,
    /// Unexpected internal error
    InternalError,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigMissing => 1,
            Self::ConfigInvalid => 2,
            Self::ConfigParseError => 3,
            Self::ConfigUnknownPath => 4,
            Self::ConfigCastError => 5,
            Self::ConfigEnvError => 6,
            Self::ConfigSectionNotSet => 7,

            Self::UnknownFactory => 100,
            Self::FactoryFailure => 101,
            Self::FactoryRedirectLoop => 102,
            Self::FactoryClassNotFound => 103,
            Self::FactoryTransportGone => 104,

            Self::CliNonZeroExit => 200,
            Self::HttpStatus => 201,
            Self::SshConnectionFailed => 202,
            Self::SshTimeout => 203,
            Self::TransportParse => 204,
            Self::TransportUnsupported => 205,
            Self::HttpRequestFailed => 206,

            Self::TaskTimeout => 300,
            Self::TaskFailed => 301,
            Self::TaskNotFound => 302,

            Self::SetupSubscriptionNotFound => 400,
            Self::SetupPermissionMissing => 401,
            Self::SetupManifestError => 402,
            Self::ManifestLockTimeout => 403,
            Self::SetupEntityMissing => 404,
            Self::AssertionMismatch => 405,

            Self::SkipRequested => 500,
            Self::UnknownSection => 501,
            Self::WorkerAlignmentFailed => 502,
            Self::ScopedSettingMissing => 503,
            Self::ScopedRestoreFailed => 504,
            Self::InternalError => 599,
        }
    }

    /// Returns the formatted error code string (e.g., "SFG-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("SFG-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Factory,
            200..=299 => ErrorCategory::Transport,
            300..=399 => ErrorCategory::Task,
            400..=499 => ErrorCategory::Setup,
            _ => ErrorCategory::Harness,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigMissing => "Required settings file or section is missing",
            Self::ConfigInvalid => "Settings validation failed",
            Self::ConfigParseError => "Settings file could not be parsed",
            Self::ConfigUnknownPath => "Settings path did not resolve in any provider",
            Self::ConfigCastError => "Settings value has the wrong type",
            Self::ConfigEnvError => "Environment override has an invalid value",
            Self::ConfigSectionNotSet => "Settings section is not set",

            Self::UnknownFactory => "Unknown factory name",
            Self::FactoryFailure => "Entity creation failed",
            Self::FactoryRedirectLoop => "Factory redirect chain loops",
            Self::FactoryClassNotFound => "No entity class matches the factory",
            Self::FactoryTransportGone => "Transport was dropped before the factory call",

            Self::CliNonZeroExit => "Hammer command exited with a non-zero status",
            Self::HttpStatus => "API request returned an error status",
            Self::SshConnectionFailed => "SSH connection to the SUT failed",
            Self::SshTimeout => "Remote command timed out",
            Self::TransportParse => "Transport output could not be parsed",
            Self::TransportUnsupported => "Transport does not support this call",
            Self::HttpRequestFailed => "API request could not be sent",

            Self::TaskTimeout => "Timed out waiting for SUT task",
            Self::TaskFailed => "SUT task finished unsuccessfully",
            Self::TaskNotFound => "No matching SUT task appeared",

            Self::SetupSubscriptionNotFound => "Subscription not found or exhausted",
            Self::SetupPermissionMissing => "Requested permissions are unavailable",
            Self::SetupManifestError => "Manifest clone or upload failed",
            Self::ManifestLockTimeout => "Timed out waiting for the manifest lock",
            Self::SetupEntityMissing => "Setup step returned an incomplete handle",
            Self::AssertionMismatch => "Verification step did not match",

            Self::SkipRequested => "Test skipped",
            Self::UnknownSection => "Unknown settings section",
            Self::WorkerAlignmentFailed => "Worker could not be bound to a SUT host",
            Self::ScopedSettingMissing => "SUT setting not found",
            Self::ScopedRestoreFailed => "Failed to restore captured SUT state",
            Self::InternalError => "Internal error",
        }
    }

    /// Returns remediation steps for the error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigMissing => &[
                "Create settings.yaml in the settings directory",
                "Or point SUTFORGE_SETTINGS_DIR at an existing directory",
            ],
            Self::ConfigInvalid => &[
                "Fix every listed option in the settings files",
                "Run 'sutforge validate' to re-check",
                "Use lazy mode only for test discovery",
            ],
            Self::ConfigParseError => &[
                "Check YAML indentation and quoting",
                "Check robottelo.properties for lines without '=' or ':'",
            ],
            Self::ConfigUnknownPath => &[
                "Check the dotted path for typos",
                "Run 'sutforge sections' to list configured sections",
            ],
            Self::ConfigCastError => &["Check the value against the option's expected type"],
            Self::ConfigEnvError => &[
                "Check SUTFORGE_* environment variables",
                "Booleans accept 1/yes/true/on and 0/no/false/off",
            ],
            Self::ConfigSectionNotSet => &["Add the section to settings.yaml or robottelo.properties"],

            Self::UnknownFactory => &["Check the factory name against the registry"],
            Self::FactoryFailure => &[
                "Read the options dump and the SUT message above",
                "Check that referenced parent entities exist",
            ],
            Self::FactoryRedirectLoop => &["Fix the redirect entries in the registry"],
            Self::FactoryClassNotFound => &[
                "Add an entity class hint to the factory",
                "Or register the class in the entity catalog",
            ],
            Self::FactoryTransportGone => &["Keep the transport alive for as long as the dispatcher"],

            Self::CliNonZeroExit => &[
                "Read stderr for the SUT's message",
                "Re-run the masked command by hand on the SUT",
            ],
            Self::HttpStatus => &["Read the response body for the SUT's message"],
            Self::SshConnectionFailed => &[
                "Check server.hostname and server.ssh_username",
                "Check that the SSH key is authorised on the SUT",
            ],
            Self::SshTimeout => &["Raise server.ssh_client.command_timeout"],
            Self::TransportParse => &["Check that hammer supports --output=json on the SUT"],
            Self::TransportUnsupported => &["Use the other transport for this entity"],
            Self::HttpRequestFailed => &[
                "Check network reachability of the SUT",
                "Check server.scheme and server.port",
            ],

            Self::TaskTimeout => &[
                "Inspect the task on the SUT using the printed search query",
                "Raise the wait timeout if the SUT is slow",
            ],
            Self::TaskFailed => &["Inspect the task's output on the SUT"],
            Self::TaskNotFound => &["Check that the action actually spawned a task"],

            Self::SetupSubscriptionNotFound => &[
                "Check that the product has a subscription in the organization",
                "Upload a manifest with available quantity",
            ],
            Self::SetupPermissionMissing => &["Request only permissions the SUT version provides"],
            Self::SetupManifestError => &[
                "Check fake_manifest.path or fake_manifest.url",
                "Check that the manifest archive is readable",
            ],
            Self::ManifestLockTimeout => &[
                "Check for a stuck worker holding the manifest lock",
                "Remove the lock file if its owner is gone",
            ],
            Self::SetupEntityMissing => &["Check the SUT response for the step that failed"],
            Self::AssertionMismatch => &["Compare the expected and actual values in the message"],

            Self::SkipRequested => &["Configure the listed sections to run the test"],
            Self::UnknownSection => &["Use one of the listed valid section names"],
            Self::WorkerAlignmentFailed => &[
                "Check server.hostnames has enough entries for all workers",
                "Or use the run-on-one or balance strategy",
            ],
            Self::ScopedSettingMissing => &["Check the setting name on the SUT"],
            Self::ScopedRestoreFailed => &[
                "Restore the value on the SUT by hand",
                "Check SUT availability",
            ],
            Self::InternalError => &["Report the bug with the full log"],
        }
    }

    /// Returns all error codes.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigMissing,
            Self::ConfigInvalid,
            Self::ConfigParseError,
            Self::ConfigUnknownPath,
            Self::ConfigCastError,
            Self::ConfigEnvError,
            Self::ConfigSectionNotSet,
            Self::UnknownFactory,
            Self::FactoryFailure,
            Self::FactoryRedirectLoop,
            Self::FactoryClassNotFound,
            Self::FactoryTransportGone,
            Self::CliNonZeroExit,
            Self::HttpStatus,
            Self::SshConnectionFailed,
            Self::SshTimeout,
            Self::TransportParse,
            Self::TransportUnsupported,
            Self::HttpRequestFailed,
            Self::TaskTimeout,
            Self::TaskFailed,
            Self::TaskNotFound,
            Self::SetupSubscriptionNotFound,
            Self::SetupPermissionMissing,
            Self::SetupManifestError,
            Self::ManifestLockTimeout,
            Self::SetupEntityMissing,
            Self::AssertionMismatch,
            Self::SkipRequested,
            Self::UnknownSection,
            Self::WorkerAlignmentFailed,
            Self::ScopedSettingMissing,
            Self::ScopedRestoreFailed,
            Self::InternalError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Settings errors (E001-E099)
    Config,
    /// Factory errors (E100-E199)
    Factory,
    /// Transport errors (E200-E299)
    Transport,
    /// Task wait errors (E300-E399)
    Task,
    /// Setup scenario errors (E400-E499)
    Setup,
    /// Runner surface and internal errors (E500-E599)
    Harness,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Factory => "Factory",
            Self::Transport => "Transport",
            Self::Task => "Task",
            Self::Setup => "Setup",
            Self::Harness => "Harness",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "SFG-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
