//! Session header line.

use super::HarnessError;
use sutforge_common::Settings;

/// One line stating whether the shared-function cache is on, with its
/// storage and scope when it is.
pub fn test_header(settings: &Settings) -> Result<String, HarnessError> {
    let shared = settings.shared_function()?;
    if !shared.enabled {
        return Ok("shared function enabled - OFF".to_string());
    }
    Ok(format!(
        "shared function enabled - ON - storage: {} - scope: {}",
        shared.storage,
        shared.scope.as_deref().unwrap_or("-")
    ))
}
