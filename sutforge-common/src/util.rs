//! Small helpers shared across the workspace.

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// A shell word: single-quoted, double-quoted (with escapes) or bare.
const SHELL_WORD: &str = r#"(?:'[^']*'|"(?:[^"\\]|\\.)*"|\S+)"#;

struct Maskers {
    assignment: Regex,
    long_flag: Regex,
    short_p: Regex,
}

fn maskers() -> &'static Maskers {
    static MASKERS: OnceLock<Maskers> = OnceLock::new();
    MASKERS.get_or_init(|| Maskers {
        assignment: Regex::new(&format!(
            r"(?P<key>\b[A-Z0-9_]*(?:PASSWORD|TOKEN|API_KEY|SECRET)=){SHELL_WORD}"
        ))
        .expect("valid assignment regex"),
        long_flag: Regex::new(&format!(r"(?P<key>--(?:password|token|api-key)(?:=|\s+)){SHELL_WORD}"))
            .expect("valid flag regex"),
        short_p: Regex::new(&format!(r"(?P<prev>\S*)(?P<key>\s-p\s+){SHELL_WORD}"))
            .expect("valid -p regex"),
    })
}

/// Mask credentials in a command string before logging or raising it.
///
/// Covers hammer's `-p <password>` (but not the `-p` of `time -p`),
/// long password/token flags, and password-like environment assignments.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let m = maskers();
    let masked = m
        .assignment
        .replace_all(cmd, |caps: &Captures| format!("{}***", &caps["key"]));
    let masked = m
        .long_flag
        .replace_all(&masked, |caps: &Captures| format!("{}***", &caps["key"]));
    m.short_p
        .replace_all(&masked, |caps: &Captures| {
            if &caps["prev"] == "time" {
                caps[0].to_string()
            } else {
                format!("{}{}***", &caps["prev"], &caps["key"])
            }
        })
        .into_owned()
}

/// Render a JSON value for humans: strings bare, everything else as JSON.
pub fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
