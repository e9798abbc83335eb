//! `${VAR}` environment interpolation over raw config text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

/// Replaces every `${VAR}` with the value of `VAR` from the environment.
/// Placeholders whose variable is unset (or empty) are preserved verbatim so
/// downstream visibility checks can recognise them.
pub fn interpolate_env(content: &str) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &Captures| {
            match std::env::var(&caps[1]) {
                Ok(v) if !v.is_empty() => v,
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_set_variables() {
        std::env::set_var("WAYFARER_INTERP_A", "alpha");
        let out = interpolate_env("key: ${WAYFARER_INTERP_A}!");
        assert_eq!(out, "key: alpha!");
        std::env::remove_var("WAYFARER_INTERP_A");
    }

    #[test]
    fn preserves_unset_variables() {
        std::env::remove_var("WAYFARER_INTERP_B");
        let out = interpolate_env("key: ${WAYFARER_INTERP_B}");
        assert_eq!(out, "key: ${WAYFARER_INTERP_B}");
    }

    #[test]
    fn replaces_multiple_occurrences() {
        std::env::set_var("WAYFARER_INTERP_C", "c");
        let out = interpolate_env("${WAYFARER_INTERP_C}-${WAYFARER_INTERP_C}");
        assert_eq!(out, "c-c");
        std::env::remove_var("WAYFARER_INTERP_C");
    }

    #[test]
    fn ignores_malformed_placeholders() {
        let out = interpolate_env("a ${not closed and $PLAIN");
        assert_eq!(out, "a ${not closed and $PLAIN");
    }
}
