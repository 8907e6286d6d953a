//! SDP post-processing applied to offers produced on behalf of clients.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches an `a=candidate:` line, together with its preceding line break,
/// whose connection address (the fifth field) lies in `10.0.0.0/8`.
static PRIVATE_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\r?\na=candidate:[^ ]* [^ ]* [^ ]* [^ ]* 10\.[^\r\n]*")
        .unwrap()
});

/// Removes every ICE candidate advertising a `10.0.0.0/8` address from
/// `sdp`, leaving all other bytes (line endings included) untouched. Peers
/// must not be pointed at the gateway's private network.
pub fn strip(sdp: &str) -> String {
    PRIVATE_CANDIDATE.replace_all(sdp, "").into_owned()
}
