// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command line for `wardend`

use std::path::PathBuf;
use thiserror::Error;

pub const USAGE: &str = "usage: wardend [--check-config | --self-test] [CONFIG]";

/// What the process should do once the configuration is loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Run until SIGTERM/SIGINT
    #[default]
    Serve,
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Assemble the engine, run the compatibility checks, then exit
    SelfTest,
    Version,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub mode: Mode,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("unknown option: {0}\n{USAGE}")]
    UnknownOption(String),
    #[error("unexpected argument: {0}\n{USAGE}")]
    Unexpected(String),
}

impl Args {
    /// Parse arguments (without the program name); `WARDEN_CONFIG` fills in a missing path
    pub fn parse<I>(args: I, env_config: Option<PathBuf>) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Args::default();
        for arg in args {
            match arg.as_str() {
                "--check-config" => parsed.mode = Mode::CheckConfig,
                "--self-test" => parsed.mode = Mode::SelfTest,
                "--version" | "-V" => parsed.mode = Mode::Version,
                flag if flag.starts_with('-') => {
                    return Err(UsageError::UnknownOption(arg));
                }
                _ if parsed.config_path.is_some() => return Err(UsageError::Unexpected(arg)),
                _ => parsed.config_path = Some(PathBuf::from(arg)),
            }
        }
        if parsed.config_path.is_none() {
            parsed.config_path = env_config;
        }
        Ok(parsed)
    }
}

#[cfg(test)]
#[path = "args_tests.rs"]
mod tests;
