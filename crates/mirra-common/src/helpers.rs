//! Common helper functions for Mirra.

/// Reads a boolean switch from the environment.
///
/// `1`, `true`, `yes` and `on` (any case) are truthy; any other value is
/// false. Falls back to `default` when the variable is unset.
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Splits a comma or semicolon separated list, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
