//! `$(name)` / `$(?name)` macro expansion for configuration values.
//!
//! A macro is replaced by the value of the named key. `$(name)` requires the
//! key to exist, `$(?name)` falls back to an empty string. Scanning resumes at
//! the start of each replacement, so substituted text may itself contain
//! macros that get expanded in turn.

use super::error::ConfigError;

const MACRO_OPEN: &str = "$(";
const MACRO_CLOSE: char = ')';
const OPTIONAL_PREFIX: char = '?';

/// Maximum number of substitutions performed on a single value.
pub const MAX_SUBSTITUTIONS: usize = 1024;

/// Expand every macro in `value` using `lookup`.
pub fn resolve<F>(value: &str, lookup: F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    resolve_with_limit(value, lookup, MAX_SUBSTITUTIONS)
}

/// Same as [`resolve`] with an explicit substitution budget.
pub fn resolve_with_limit<F>(value: &str, mut lookup: F, limit: usize) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    if !value.contains(MACRO_OPEN) {
        return Ok(value.to_string());
    }

    let mut out = value.to_string();
    let mut from = 0;
    let mut substitutions = 0;

    while let Some(rel) = out[from..].find(MACRO_OPEN) {
        let start = from + rel;
        let name_start = start + MACRO_OPEN.len();
        let end = match out[name_start..].find(MACRO_CLOSE) {
            Some(rel_end) => name_start + rel_end,
            None => return Err(ConfigError::MalformedMacro { value: value.to_string() }),
        };

        if substitutions == limit {
            return Err(ConfigError::MacroExpansionLimit { value: value.to_string(), limit });
        }
        substitutions += 1;

        let token = &out[name_start..end];
        let replacement = match token.strip_prefix(OPTIONAL_PREFIX) {
            Some(name) => lookup(name).unwrap_or_default(),
            None => lookup(token).ok_or_else(|| ConfigError::MissingKey { key: token.to_string() })?,
        };

        out.replace_range(start..=end, &replacement);
        from = start;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn plain_values_are_untouched() {
        let map = table(&[]);
        let out = resolve("python -m worker (no macros) $ ( here", |k| map.get(k).cloned()).unwrap();
        assert_eq!(out, "python -m worker (no macros) $ ( here");
    }

    #[test]
    fn substitutes_required_and_optional() {
        let map = table(&[("ConfigDir", r"C:\cfg"), ("Name", "srv")]);
        let out = resolve(r"$(ConfigDir)\run.exe --name=$(Name)$(?Suffix)", |k| map.get(k).cloned()).unwrap();
        assert_eq!(out, r"C:\cfg\run.exe --name=srv");
    }

    #[test]
    fn missing_required_key_fails() {
        let map = table(&[]);
        let err = resolve("$(Missing)", |k| map.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key } if key == "Missing"));
    }

    #[test]
    fn optional_missing_key_is_empty() {
        let map = table(&[]);
        assert_eq!(resolve("a$(?Missing)b", |k| map.get(k).cloned()).unwrap(), "ab");
    }

    #[test]
    fn unterminated_macro_fails() {
        let map = table(&[("A", "1")]);
        let err = resolve("$(A) and $(B", |k| map.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedMacro { .. }));
    }

    #[test]
    fn replacement_text_is_expanded_again() {
        let map = table(&[("Outer", "<$(Inner)>"), ("Inner", "x")]);
        assert_eq!(resolve("$(Outer)!", |k| map.get(k).cloned()).unwrap(), "<x>!");
    }

    #[test]
    fn replacement_can_build_a_new_macro_token() {
        // "$(" from one key and "Key)" from the next form a macro together
        let map = table(&[("Open", "$("), ("Key", "v")]);
        assert_eq!(resolve("$(Open)Key)", |k| map.get(k).cloned()).unwrap(), "v");
    }

    #[test]
    fn self_referencing_keys_hit_the_limit() {
        let map = table(&[("A", "$(B)"), ("B", "$(A)")]);
        let err = resolve_with_limit("$(A)", |k| map.get(k).cloned(), 16).unwrap_err();
        assert!(matches!(err, ConfigError::MacroExpansionLimit { limit: 16, .. }));
    }
}
