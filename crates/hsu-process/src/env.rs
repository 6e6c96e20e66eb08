//! Environment collaborator and child environment construction.

use crate::spec::{EnvironmentMode, EnvironmentSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{OsStr, OsString};
use tracing::debug;

/// A complete process environment. Names and values need not be Unicode.
pub type Environment = BTreeMap<OsString, OsString>;

/// Source of the caller's environment.
pub trait EnvironmentSource: Send + Sync {
    fn current_environment(&self) -> Environment;

    /// One variable of the caller's environment.
    fn var(&self, key: &str) -> Option<OsString> {
        self.current_environment().remove(OsStr::new(key))
    }
}

/// [`EnvironmentSource`] reading the current process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEnvironment;

impl EnvironmentSource for OsEnvironment {
    fn current_environment(&self) -> Environment {
        std::env::vars_os().collect()
    }

    fn var(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }
}

/// Build the exact environment a child will receive.
///
/// - `Replace` mode: only the spec's variables.
/// - `Inherit` mode: the caller's environment, filtered by `allowed_keys`
///   when an allow-list is given, minus the spec's removals, plus the spec's
///   variables. The allow-list only filters inherited keys; variables set
///   explicitly on the spec always pass.
///
/// Inherited variables are carried byte for byte, including ones that are
/// not valid Unicode. A non-Unicode name can never match the allow-list.
pub fn build_environment(
    spec: &EnvironmentSpec,
    allowed_keys: Option<&BTreeSet<String>>,
    source: &dyn EnvironmentSource,
) -> Environment {
    let mut env = match spec.mode {
        EnvironmentMode::Replace => Environment::new(),
        EnvironmentMode::Inherit => {
            let mut inherited = source.current_environment();
            if let Some(allowed) = allowed_keys {
                let before = inherited.len();
                inherited.retain(|key, _| key.to_str().map_or(false, |k| allowed.contains(k)));
                debug!(
                    kept = inherited.len(),
                    dropped = before - inherited.len(),
                    "Applied environment allow-list"
                );
            }
            for key in &spec.remove {
                inherited.remove(OsStr::new(key));
            }
            inherited
        }
    };

    for (key, value) in &spec.vars {
        env.insert(OsString::from(key), OsString::from(value));
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEnvironment(Environment);

    impl EnvironmentSource for FixedEnvironment {
        fn current_environment(&self) -> Environment {
            self.0.clone()
        }
    }

    fn caller_env() -> FixedEnvironment {
        FixedEnvironment(
            [
                ("PATH", "/usr/bin:/bin"),
                ("HOME", "/home/tester"),
                ("SECRET_TOKEN", "hunter2"),
                ("LD_PRELOAD", "/tmp/evil.so"),
            ]
            .into_iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect(),
        )
    }

    fn get<'a>(env: &'a Environment, key: &str) -> Option<&'a str> {
        env.get(OsStr::new(key)).and_then(|v| v.to_str())
    }

    #[test]
    fn test_inherit_and_overlay() {
        let mut spec = EnvironmentSpec::default();
        spec.vars.insert("HOME".into(), "/override".into());
        spec.vars.insert("EXTRA".into(), "1".into());
        spec.remove.insert("LD_PRELOAD".into());

        let env = build_environment(&spec, None, &caller_env());
        assert_eq!(get(&env, "HOME"), Some("/override"));
        assert_eq!(get(&env, "EXTRA"), Some("1"));
        assert!(env.contains_key(OsStr::new("SECRET_TOKEN")));
        assert!(!env.contains_key(OsStr::new("LD_PRELOAD")));
    }

    #[test]
    fn test_allow_list_filters_inherited_only() {
        let mut spec = EnvironmentSpec::default();
        spec.vars.insert("CALLER_SET".into(), "yes".into());

        let allowed: BTreeSet<String> = ["PATH".to_string()].into_iter().collect();
        let env = build_environment(&spec, Some(&allowed), &caller_env());

        let keys: Vec<&OsStr> = env.keys().map(OsString::as_os_str).collect();
        assert_eq!(keys, vec![OsStr::new("CALLER_SET"), OsStr::new("PATH")]);
    }

    #[test]
    fn test_replace_ignores_caller_environment() {
        let mut spec = EnvironmentSpec {
            mode: EnvironmentMode::Replace,
            ..Default::default()
        };
        spec.vars.insert("ONLY".into(), "this".into());

        let allowed: BTreeSet<String> = ["PATH".to_string()].into_iter().collect();
        let env = build_environment(&spec, Some(&allowed), &caller_env());
        assert_eq!(env.len(), 1);
        assert_eq!(get(&env, "ONLY"), Some("this"));
    }

    #[test]
    fn test_var_reads_from_source() {
        assert_eq!(
            caller_env().var("HOME"),
            Some(OsString::from("/home/tester"))
        );
        assert_eq!(caller_env().var("MISSING"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_unicode_values_are_inherited() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(b"a\xffb".to_vec());
        let mut inherited = caller_env().0;
        inherited.insert(OsString::from("RAW_BYTES"), raw.clone());
        inherited.insert(OsString::from_vec(b"RAW\xffKEY".to_vec()), OsString::from("v"));
        let source = FixedEnvironment(inherited);

        let env = build_environment(&EnvironmentSpec::default(), None, &source);
        assert_eq!(env.get(OsStr::new("RAW_BYTES")), Some(&raw));
        assert!(env.contains_key(&OsString::from_vec(b"RAW\xffKEY".to_vec())));

        let allowed: BTreeSet<String> = ["RAW_BYTES".to_string()].into_iter().collect();
        let env = build_environment(&EnvironmentSpec::default(), Some(&allowed), &source);
        assert_eq!(env.len(), 1);
        assert_eq!(env.get(OsStr::new("RAW_BYTES")), Some(&raw));
    }
}
