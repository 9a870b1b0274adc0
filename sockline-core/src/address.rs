//! Address strings shared by every dialer and listener.

use std::path::PathBuf;

/// Canonical `host:port` form.
pub fn address(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Socket path for the Unix transport. A zero port means `host` already is the
/// full path; otherwise the `host:port` string is used verbatim as the path.
pub fn unix_path(host: &str, port: u16) -> PathBuf {
    if port == 0 {
        PathBuf::from(host)
    } else {
        PathBuf::from(address(host, port))
    }
}
