//! Process validation utilities.
//!
//! Validation functions for argument specs. Every failure is an
//! `ExecError::InvalidSpec` naming the offending field.

use crate::fs::FileSystem;
use hsu_common::{ExecError, ExecResult};
use std::path::Path;

/// Validate that a program name or path is usable.
pub fn validate_program(program: &str) -> ExecResult<()> {
    if program.is_empty() {
        return Err(ExecError::invalid_spec("program", "program cannot be empty"));
    }

    if program.contains('\0') {
        return Err(ExecError::invalid_spec(
            "program",
            "program contains a NUL byte",
        ));
    }

    Ok(())
}

/// Validate a single argument. Any byte sequence except NUL is allowed.
pub fn validate_argument(field: &str, arg: &str) -> ExecResult<()> {
    if arg.contains('\0') {
        return Err(ExecError::invalid_spec(field, "argument contains a NUL byte"));
    }
    Ok(())
}

/// Validate an environment variable name.
pub fn validate_env_key(key: &str) -> ExecResult<()> {
    if key.is_empty() {
        return Err(ExecError::invalid_spec(
            "environment",
            "environment key cannot be empty",
        ));
    }

    if key.contains('=') || key.contains('\0') {
        return Err(ExecError::invalid_spec(
            format!("environment.{}", key.replace('\0', "\\0")),
            "environment key cannot contain '=' or NUL",
        ));
    }

    Ok(())
}

/// Validate an environment variable value.
pub fn validate_env_value(key: &str, value: &str) -> ExecResult<()> {
    if value.contains('\0') {
        return Err(ExecError::invalid_spec(
            format!("environment.{}", key),
            "environment value contains a NUL byte",
        ));
    }
    Ok(())
}

/// Validate that a working directory is absolute, exists, and is a directory.
pub fn validate_working_directory(dir: &Path, fs: &dyn FileSystem) -> ExecResult<()> {
    if !dir.is_absolute() {
        return Err(ExecError::invalid_spec(
            "working_directory",
            format!("must be an absolute path: {}", dir.display()),
        ));
    }

    if !fs.exists(dir) {
        return Err(ExecError::invalid_spec(
            "working_directory",
            format!("does not exist: {}", dir.display()),
        ));
    }

    if !fs.is_dir(dir) {
        return Err(ExecError::invalid_spec(
            "working_directory",
            format!("not a directory: {}", dir.display()),
        ));
    }

    Ok(())
}
