//! # HSU Process
//!
//! Low-level process operations for HSU process execution.
//!
//! This crate provides the building blocks the supervisor composes:
//! - [`ArgumentSpec`]: an immutable, validated description of a command
//! - Filesystem and environment collaborators ([`FileSystem`], [`EnvironmentSource`])
//! - Program resolution and process spawning
//! - Signal delivery to a process or its process group
//!
//! Arguments are always an argument vector handed to the OS exec call.
//! Nothing here ever builds a shell command line.

pub mod check;
pub mod env;
pub mod execute;
pub mod fs;
pub mod spec;
pub mod terminate;
pub mod validation;

// Re-export main types
pub use check::process_exists;
pub use env::{build_environment, Environment, EnvironmentSource, OsEnvironment};
pub use execute::{
    build_command, classify_spawn_error, resolve_program, spawn_command, CommandPlan,
    SpawnFailure, SpawnFailureKind,
};
pub use fs::{FileSystem, OsFileSystem};
pub use spec::{ArgumentSpec, EnvironmentMode, EnvironmentSpec};
pub use terminate::{
    force_kill, send_signal, signal_name, signal_number, supports_graceful_termination,
    terminate_gracefully, SignalTarget,
};
pub use validation::*;
