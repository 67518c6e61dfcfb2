//! Maps observed certificate identities to canonical server tags.

/// Organization that every recognized certificate must carry.
pub const GOOGLE_ORG: &str = "Google Inc";

/// Server tag of the Google web frontend.
pub const GWS: &str = "gws";

/// Server tag of the Google video frontend.
pub const GVS: &str = "gvs 1.0";

/// Fragment of an HTTP error message that is treated as a positive
/// identification of a Google frontend resetting the connection.
pub const RESET_SIGNATURE: &str = "www.google.com";

/// Returns the server tag for a certificate identity.
///
/// `None` means the identity is unknown and the probe must be dropped.
/// A Google certificate with an unlisted common name yields an empty tag,
/// which is kept until the allowlist check.
///
/// ```rust
/// # use edgescan::classifier::classify;
/// assert_eq!(classify("Google Inc", "google.com"), Some("gws"));
/// assert_eq!(classify("Acme Corp", "google.com"), None);
/// ```
pub fn classify(org: &str, common_name: &str) -> Option<&'static str> {
    if org != GOOGLE_ORG {
        return None;
    }

    match common_name {
        "google.com" => Some(GWS),
        "*.c.docs.google.com" | "*.googlevideo.com" => Some(GVS),
        _ => Some(""),
    }
}

/// Whether an HTTP error text carries the known reset signature.
pub fn is_reset_signature(error_text: &str) -> bool {
    error_text.contains(RESET_SIGNATURE)
}
