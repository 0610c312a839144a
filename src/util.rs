/// Utility helpers shared by the configuration and the collectors.
///
/// IMPORTANT:
/// - No API or metric-family specific logic should live here.
/// - Everything in this module is pure and deterministic, except
///   the clock and the crypto provider setup.

use chrono::Utc;
use rustls::crypto::{CryptoProvider, ring};

/// Split a comma-separated configuration list.
///
/// Entries are trimmed and empty entries are dropped, so
/// `"a, b,,"` yields `["a", "b"]`.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Current Unix timestamp in seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Installs the `ring` provider as the process-wide rustls default.
///
/// rustls >= 0.23 refuses to pick a provider on its own when more
/// than one is compiled in. Calling this again is a no-op.
pub fn install_crypto_provider() {
    let _ = CryptoProvider::install_default(ring::default_provider());
}

/// Maps a runner's `status` field to its gauge value.
pub fn online_value(status: &str) -> f64 {
    if status == "online" { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list("a, b,,"), vec!["a", "b"]);
        assert!(split_list("").is_empty());
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn online_value_maps_status() {
        assert_eq!(online_value("online"), 1.0);
        assert_eq!(online_value("offline"), 0.0);
    }
}
