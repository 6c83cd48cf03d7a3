//! Namespace prefix handling.
//!
//! Role and permission codes are stored fully qualified as
//! `{namespace}:{localcode}`. The `global` namespace applies to every
//! downstream system; any other namespace is a downstream system's code and
//! scopes its entities to that system alone.

/// The reserved namespace whose roles/permissions apply everywhere.
pub const GLOBAL: &str = "global";

/// Strip the `{namespace}:` prefix from a code.
///
/// Codes that do not carry the prefix are returned unchanged, which makes
/// stripping lossless: `qualify(ns, strip(code, ns))` reproduces any
/// properly prefixed `code`.
#[must_use]
pub fn strip(code: &str, namespace: &str) -> String {
    match code.strip_prefix(namespace) {
        Some(rest) if rest.starts_with(':') => rest[1..].to_string(),
        _ => code.to_string(),
    }
}

/// Qualify a local code with its namespace prefix.
#[must_use]
pub fn qualify(namespace: &str, local: &str) -> String {
    format!("{namespace}:{local}")
}
