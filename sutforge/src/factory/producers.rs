//! Random value producers used as factory defaults.
//!
//! Every producer returns a fresh value per call; nothing is cached.

use serde_json::Value;

const ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated names.
pub const NAME_LENGTH: usize = 10;

fn pick(charset: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| charset[fastrand::usize(..charset.len())] as char)
        .collect()
}

pub fn gen_alpha(len: usize) -> String {
    pick(ALPHA, len)
}

pub fn gen_alphanumeric(len: usize) -> String {
    pick(ALPHANUMERIC, len)
}

pub fn gen_integer(min: u64, max: u64) -> u64 {
    fastrand::u64(min..=max)
}

/// A /24 network address: three random octets followed by `.0`.
pub fn gen_ipaddr() -> String {
    format!(
        "{}.{}.{}.0",
        fastrand::u8(1..=223),
        fastrand::u8(0..=255),
        fastrand::u8(0..=255)
    )
}

/// A locally administered unicast MAC address.
pub fn gen_mac() -> String {
    let mut octets: [u8; 6] = std::array::from_fn(|_| fastrand::u8(..));
    octets[0] = (octets[0] & 0xfc) | 0x02;
    octets
        .iter()
        .map(|o| format!("{o:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

pub fn gen_url(scheme: &str) -> String {
    format!("{scheme}://{}.example.test", gen_alpha(NAME_LENGTH).to_lowercase())
}

pub fn gen_email() -> String {
    format!("{}@example.test", gen_alpha(NAME_LENGTH).to_lowercase())
}

// Zero-argument wrappers usable as `FieldValue::Lazy`.

pub fn name() -> Value {
    Value::String(gen_alpha(NAME_LENGTH))
}

pub fn alphanumeric() -> Value {
    Value::String(gen_alphanumeric(NAME_LENGTH))
}

pub fn description() -> Value {
    Value::String(gen_alpha(20))
}

pub fn password() -> Value {
    Value::String(gen_alphanumeric(12))
}

pub fn domain_name() -> Value {
    Value::String(format!("{}.test", gen_alpha(NAME_LENGTH).to_lowercase()))
}

pub fn network() -> Value {
    Value::String(gen_ipaddr())
}

pub fn mac() -> Value {
    Value::String(gen_mac())
}

pub fn http_url() -> Value {
    Value::String(gen_url("http"))
}

pub fn media_path() -> Value {
    Value::String(format!("{}/$version/os/$arch", gen_url("http")))
}

pub fn proxy_url() -> Value {
    Value::String(format!("{}:3128", gen_url("http")))
}

pub fn major_version() -> Value {
    Value::from(gen_integer(1, 30))
}

pub fn minor_version() -> Value {
    Value::from(gen_integer(0, 9))
}

pub fn today() -> Value {
    Value::String(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use regex::Regex;

    #[test]
    fn test_ipaddr_ends_with_zero() {
        let re = Regex::new(r"^\d+\.\d+\.\d+\.0$").unwrap();
        for _ in 0..50 {
            assert!(re.is_match(&gen_ipaddr()));
        }
    }

    #[test]
    fn test_mac_shape() {
        let re = Regex::new(r"^[0-9a-f]{2}(:[0-9a-f]{2}){5}$").unwrap();
        let mac = gen_mac();
        assert!(re.is_match(&mac), "{mac}");
        let first = u8::from_str_radix(&mac[..2], 16).unwrap();
        assert_eq!(first & 0x03, 0x02);
    }

    #[test]
    fn test_versions_are_fresh_per_call() {
        let draws: std::collections::BTreeSet<u64> =
            (0..100).filter_map(|_| major_version().as_u64()).collect();
        assert!(draws.len() > 1);
    }

    proptest! {
        #[test]
        fn alpha_is_alpha(len in 1usize..64) {
            let s = gen_alpha(len);
            prop_assert_eq!(s.len(), len);
            prop_assert!(s.chars().all(|c| c.is_ascii_alphabetic()));
        }
    }
}
