//! Value casts for raw configuration strings.
//!
//! Every cast is a pure `&str -> Result<T, CastError>` function. Malformed
//! input is always an error; nothing falls back to a default here. Callers
//! that want a default (the env parser, section readers) decide that
//! themselves.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Errors raised by the casts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CastError {
    #[error("Invalid boolean value '{0}': expected one of 1/yes/true/on or 0/no/false/off")]
    InvalidBoolean(String),

    #[error("Invalid logging level '{0}': expected one of critical, debug, error, info, warning")]
    InvalidLogLevel(String),

    #[error("Malformed key=value entry '{0}'")]
    MalformedPair(String),

    #[error("Unterminated double quote in '{0}'")]
    UnterminatedQuote(String),
}

const TRUTHY: [&str; 4] = ["1", "yes", "true", "on"];
const FALSY: [&str; 4] = ["0", "no", "false", "off"];

/// Cast a string to a boolean.
///
/// Surrounding whitespace is stripped before matching; the match itself is
/// case-insensitive.
pub fn cast_bool(raw: &str) -> Result<bool, CastError> {
    let value = raw.trim().to_ascii_lowercase();
    if TRUTHY.contains(&value.as_str()) {
        Ok(true)
    } else if FALSY.contains(&value.as_str()) {
        Ok(false)
    } else {
        Err(CastError::InvalidBoolean(raw.to_string()))
    }
}

/// Whether a string belongs to the boolean alphabet.
pub fn is_boolean_token(raw: &str) -> bool {
    cast_bool(raw).is_ok()
}

/// Split at top-level commas, keeping double-quoted spans intact.
fn split_top_level(raw: &str) -> Result<Vec<String>, CastError> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;

    for c in raw.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            ',' if !in_quote => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_quote {
        return Err(CastError::UnterminatedQuote(raw.to_string()));
    }
    items.push(current.trim().to_string());
    Ok(items)
}

/// Cast a comma-separated string into a list.
///
/// Double-quoted spans are kept verbatim (quotes included), so `a,"b,c"`
/// yields two elements. Blank input yields an empty list.
pub fn cast_list(raw: &str) -> Result<Vec<String>, CastError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    split_top_level(raw)
}

/// Same as [`cast_list`] but frozen.
pub fn cast_tuple(raw: &str) -> Result<Box<[String]>, CastError> {
    cast_list(raw).map(Vec::into_boxed_slice)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Cast `key=value,key2=value2` into an ordered map.
///
/// Values wrapped in double quotes are unquoted.
pub fn cast_dict(raw: &str) -> Result<BTreeMap<String, String>, CastError> {
    let mut map = BTreeMap::new();
    for item in cast_list(raw)? {
        let Some((key, value)) = item.split_once('=') else {
            return Err(CastError::MalformedPair(item));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CastError::MalformedPair(item.clone()));
        }
        map.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    Ok(map)
}

/// Logging levels accepted by configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    /// Map onto a tracing level filter. `critical` has no tracing
    /// equivalent and collapses into `error`.
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            Self::Critical | Self::Error => LevelFilter::ERROR,
            Self::Warning => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
        }
    }

    /// Directive string usable in an `EnvFilter`.
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            Self::Critical | Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cast a logging level name.
pub fn cast_log_level(raw: &str) -> Result<LogLevel, CastError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "critical" => Ok(LogLevel::Critical),
        "debug" => Ok(LogLevel::Debug),
        "error" => Ok(LogLevel::Error),
        "info" => Ok(LogLevel::Info),
        "warning" => Ok(LogLevel::Warning),
        _ => Err(CastError::InvalidLogLevel(raw.to_string())),
    }
}

/// Cast a capabilities map: a dict whose boolean-looking values become
/// JSON booleans and everything else stays a string.
pub fn cast_capabilities(raw: &str) -> Result<BTreeMap<String, Value>, CastError> {
    Ok(cast_dict(raw)?
        .into_iter()
        .map(|(key, value)| {
            let value = match cast_bool(&value) {
                Ok(flag) => Value::Bool(flag),
                Err(_) => Value::String(value),
            };
            (key, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cast_bool_accepts_alphabet() {
        for raw in ["1", "yes", "true", "on", "TRUE", " Yes ", "On\n"] {
            assert_eq!(cast_bool(raw), Ok(true), "expected true for {raw:?}");
        }
        for raw in ["0", "no", "false", "off", "FALSE", "\tOff "] {
            assert_eq!(cast_bool(raw), Ok(false), "expected false for {raw:?}");
        }
    }

    #[test]
    fn test_cast_bool_rejects_blank_and_unknown() {
        assert!(matches!(cast_bool(""), Err(CastError::InvalidBoolean(_))));
        assert!(matches!(cast_bool("   "), Err(CastError::InvalidBoolean(_))));
        assert!(matches!(cast_bool("maybe"), Err(CastError::InvalidBoolean(_))));
        assert!(matches!(cast_bool("2"), Err(CastError::InvalidBoolean(_))));
    }

    #[test]
    fn test_cast_list_respects_quotes() {
        let items = cast_list(r#"a, "b,c" ,d"#).unwrap();
        assert_eq!(items, vec!["a", r#""b,c""#, "d"]);
    }

    #[test]
    fn test_cast_list_blank_is_empty() {
        assert!(cast_list("").unwrap().is_empty());
        assert!(cast_list("   ").unwrap().is_empty());
    }

    #[test]
    fn test_cast_list_unterminated_quote() {
        assert!(matches!(
            cast_list(r#"a,"b"#),
            Err(CastError::UnterminatedQuote(_))
        ));
    }

    #[test]
    fn test_cast_tuple() {
        let tuple = cast_tuple("x, y").unwrap();
        assert_eq!(&*tuple, &["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_cast_dict() {
        let dict = cast_dict(r#"a=1, b = "x,y", c="#).unwrap();
        assert_eq!(dict.get("a").map(String::as_str), Some("1"));
        assert_eq!(dict.get("b").map(String::as_str), Some("x,y"));
        assert_eq!(dict.get("c").map(String::as_str), Some(""));
    }

    #[test]
    fn test_cast_dict_malformed() {
        assert!(matches!(cast_dict("a=1,b"), Err(CastError::MalformedPair(_))));
        assert!(matches!(cast_dict("=1"), Err(CastError::MalformedPair(_))));
    }

    #[test]
    fn test_cast_log_level() {
        assert_eq!(cast_log_level("DEBUG"), Ok(LogLevel::Debug));
        assert_eq!(cast_log_level("warning"), Ok(LogLevel::Warning));
        assert_eq!(cast_log_level(" critical "), Ok(LogLevel::Critical));
        assert!(cast_log_level("warn").is_err());
        assert!(cast_log_level("verbose").is_err());
        assert_eq!(LogLevel::Critical.to_level_filter(), LevelFilter::ERROR);
    }

    #[test]
    fn test_cast_capabilities() {
        let caps = cast_capabilities("browserName=firefox,acceptInsecureCerts=True,x=on").unwrap();
        assert_eq!(caps["browserName"], Value::String("firefox".into()));
        assert_eq!(caps["acceptInsecureCerts"], Value::Bool(true));
        assert_eq!(caps["x"], Value::Bool(true));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn test_bool_canonical_round_trip(flag in any::<bool>()) {
            let canonical = if flag { "true" } else { "false" };
            prop_assert_eq!(cast_bool(canonical), Ok(flag));
        }

        #[test]
        fn test_cast_bool_never_panics(s in ".*") {
            let _ = cast_bool(&s);
        }

        #[test]
        fn test_list_join_recovers_input(items in prop::collection::vec("[a-z0-9]{1,8}", 1..8)) {
            let raw = items.join(" , ");
            let parsed = cast_list(&raw).unwrap();
            prop_assert_eq!(parsed.join(","), items.join(","));
        }
    }
}
