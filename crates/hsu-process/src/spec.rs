//! Argument specification: what to run, with which arguments, where, and
//! with which environment.

use crate::fs::FileSystem;
use crate::validation::{
    validate_argument, validate_env_key, validate_env_value, validate_program,
    validate_working_directory,
};
use hsu_common::ExecResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// How the child's environment relates to the caller's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentMode {
    /// Start from the caller's environment, then apply the overlay.
    #[default]
    Inherit,
    /// Use exactly the variables in the overlay and nothing else.
    Replace,
}

/// Environment description for a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(default)]
    pub mode: EnvironmentMode,

    /// Variables set in the child, overriding inherited values.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Inherited variables to drop. Ignored in `Replace` mode.
    #[serde(default)]
    pub remove: BTreeSet<String>,
}

/// Immutable description of a command to run.
///
/// `args` does not include `argv[0]`. The child sees `argv[0]` as the
/// program name exactly as given here (or `arg0` when set), even when the
/// program is resolved to an absolute path on the search path.
///
/// ```
/// use hsu_process::ArgumentSpec;
///
/// let spec = ArgumentSpec::new("printf")
///     .arg("%s")
///     .arg("a;b | c $(d)")
///     .env("LC_ALL", "C");
///
/// assert_eq!(spec.program(), "printf");
/// assert_eq!(spec.arg_list(), &["%s".to_string(), "a;b | c $(d)".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arg0: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    environment: EnvironmentSpec,
}

impl ArgumentSpec {
    /// Creates a spec for `program` with no arguments, inheriting the
    /// caller's working directory and environment.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            arg0: None,
            working_directory: None,
            environment: EnvironmentSpec::default(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Overrides `argv[0]` as seen by the child (Unix only; ignored elsewhere).
    pub fn arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    /// Sets the working directory. Must be an absolute path to an existing directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Sets (or overrides) one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.environment.remove.remove(&key);
        self.environment.vars.insert(key, value.into());
        self
    }

    /// Sets several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }

    /// Drops an inherited variable from the child's environment.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.environment.vars.remove(&key);
        self.environment.remove.insert(key);
        self
    }

    /// Switches to a fully explicit environment: nothing is inherited.
    pub fn env_clear(mut self) -> Self {
        self.environment.mode = EnvironmentMode::Replace;
        self.environment.remove.clear();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after `argv[0]`, in order.
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// The `argv[0]` the child will observe.
    pub fn argv0(&self) -> &str {
        self.arg0.as_deref().unwrap_or(&self.program)
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    pub fn environment(&self) -> &EnvironmentSpec {
        &self.environment
    }

    /// Validates the spec before any OS resource is touched.
    ///
    /// Rejects an empty program, NUL bytes anywhere in the program, arguments
    /// or environment, malformed environment keys, and a working directory
    /// that is relative, missing, or not a directory. Shell metacharacters are
    /// deliberately accepted: arguments never pass through a shell.
    pub fn validate(&self, fs: &dyn FileSystem) -> ExecResult<()> {
        validate_program(&self.program)?;

        for (index, arg) in self.args.iter().enumerate() {
            validate_argument(&format!("args[{}]", index), arg)?;
        }
        if let Some(arg0) = &self.arg0 {
            validate_argument("arg0", arg0)?;
        }

        for (key, value) in &self.environment.vars {
            validate_env_key(key)?;
            validate_env_value(key, value)?;
        }
        for key in &self.environment.remove {
            validate_env_key(key)?;
        }

        if let Some(dir) = &self.working_directory {
            validate_working_directory(dir, fs)?;
        }

        Ok(())
    }
}
