//! Environment handed to a spawned worker.
//!
//! The worker does not inherit the host environment wholesale. Either the
//! config names the variables to pass (`EnvironmentInclude`), or everything
//! is passed except an optional deny-list (`EnvironmentExclude`).

use std::collections::{BTreeMap, BTreeSet};

use super::{Config, ENVIRONMENT_PREFIX};

pub const INCLUDE_KEY: &str = "EnvironmentInclude";
pub const EXCLUDE_KEY: &str = "EnvironmentExclude";

/// Which inherited variables reach the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentPolicy {
    /// Only these names, in order.
    Include(Vec<String>),
    /// Everything except these names.
    Exclude(BTreeSet<String>),
}

impl EnvironmentPolicy {
    /// `EnvironmentInclude` wins over `EnvironmentExclude` when both are set.
    pub fn from_config(config: &Config) -> Self {
        match config.try_get_value(INCLUDE_KEY) {
            Some(list) => Self::Include(split_names(list).collect()),
            None => Self::Exclude(
                config
                    .try_get_value(EXCLUDE_KEY)
                    .map(|list| split_names(list).collect())
                    .unwrap_or_default(),
            ),
        }
    }
}

/// Environment names are compared upper-cased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

fn split_names(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',').map(normalize_name).filter(|n| !n.is_empty())
}

/// Compute the worker environment from the `Environment:` keys of `config`.
pub fn build_environment(config: &Config, policy: &EnvironmentPolicy) -> BTreeMap<String, String> {
    let env: BTreeMap<String, String> = match policy {
        EnvironmentPolicy::Include(names) => names
            .iter()
            .filter_map(|name| {
                config
                    .try_get_value(&format!("{}{}", ENVIRONMENT_PREFIX, name))
                    .map(|value| (name.clone(), value.to_string()))
            })
            .collect(),
        EnvironmentPolicy::Exclude(excluded) => config
            .values()
            .iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(ENVIRONMENT_PREFIX)?;
                if name.is_empty() || excluded.contains(&normalize_name(name)) {
                    return None;
                }
                Some((name.to_string(), value.clone()))
            })
            .collect(),
    };
    tracing::debug!("Built worker environment with {} variables", env.len());
    env
}

/// Encode `env` as a wide-character environment block: `name=value\0` per
/// entry followed by a terminating `\0`.
pub fn encode_environment_block(env: &BTreeMap<String, String>) -> Vec<u16> {
    let mut block: Vec<u16> = Vec::new();
    for (name, value) in env {
        block.extend(name.encode_utf16());
        block.push(u16::from(b'='));
        block.extend(value.encode_utf16());
        block.push(0);
    }
    if block.is_empty() {
        // an empty block still needs two terminators
        block.push(0);
    }
    block.push(0);
    block
}

/// Byte-oriented variant of [`encode_environment_block`].
pub fn encode_environment_block_bytes(env: &BTreeMap<String, String>) -> Vec<u8> {
    let mut block = Vec::new();
    for (name, value) in env {
        block.extend_from_slice(name.as_bytes());
        block.push(b'=');
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostContext;
    use std::path::Path;
    use std::time::SystemTime;

    fn config(contents: &str) -> Config {
        let host = HostContext::new(
            "/opt/host/host",
            vec![
                ("FOO".to_string(), "1".to_string()),
                ("bar".to_string(), "2".to_string()),
                ("BAZ".to_string(), "3".to_string()),
            ],
        );
        Config::parse(Path::new("/cfg/w.cfg"), SystemTime::UNIX_EPOCH, contents, &host).unwrap()
    }

    fn pairs(env: &BTreeMap<String, String>) -> Vec<(&str, &str)> {
        env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    #[test]
    fn include_mode_keeps_only_listed_names() {
        let cfg = config("EnvironmentInclude=FOO,BAR");
        let policy = EnvironmentPolicy::from_config(&cfg);
        assert_eq!(policy, EnvironmentPolicy::Include(vec!["FOO".into(), "BAR".into()]));
        let env = build_environment(&cfg, &policy);
        assert_eq!(pairs(&env), vec![("BAR", "2"), ("FOO", "1")]);
    }

    #[test]
    fn include_mode_is_case_insensitive_and_skips_unknown() {
        let cfg = config("EnvironmentInclude= foo , nope,,");
        let env = build_environment(&cfg, &EnvironmentPolicy::from_config(&cfg));
        assert_eq!(pairs(&env), vec![("FOO", "1")]);
    }

    #[test]
    fn exclude_mode_drops_listed_names() {
        let cfg = config("EnvironmentExclude=baz");
        let env = build_environment(&cfg, &EnvironmentPolicy::from_config(&cfg));
        assert_eq!(pairs(&env), vec![("BAR", "2"), ("FOO", "1")]);
    }

    #[test]
    fn default_passes_everything() {
        let cfg = config("");
        let env = build_environment(&cfg, &EnvironmentPolicy::from_config(&cfg));
        assert_eq!(env.len(), 3);
    }

    #[test]
    fn include_wins_over_exclude() {
        let cfg = config("EnvironmentExclude=FOO\nEnvironmentInclude=FOO");
        let env = build_environment(&cfg, &EnvironmentPolicy::from_config(&cfg));
        assert_eq!(pairs(&env), vec![("FOO", "1")]);
    }

    #[test]
    fn config_can_define_environment_keys() {
        let cfg = config("Environment:EXTRA=$(ConfigDir)");
        let env = build_environment(&cfg, &EnvironmentPolicy::from_config(&cfg));
        assert_eq!(env.get("EXTRA").map(String::as_str), Some("/cfg"));
    }

    #[test]
    fn block_is_double_null_terminated() {
        let mut env = BTreeMap::new();
        env.insert("A".to_string(), "1".to_string());
        env.insert("B".to_string(), "xy".to_string());
        assert_eq!(encode_environment_block_bytes(&env), b"A=1\0B=xy\0\0".to_vec());
        let wide = encode_environment_block(&env);
        assert_eq!(wide.len(), 10);
        assert_eq!(&wide[wide.len() - 2..], &[0, 0]);

        let empty = BTreeMap::new();
        assert_eq!(encode_environment_block_bytes(&empty), vec![0, 0]);
        assert_eq!(encode_environment_block(&empty), vec![0, 0]);
    }
}
