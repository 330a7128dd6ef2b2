use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::cli_args::DEFAULT_ENV_FILE;

const ENV_FILE_FLAG: &str = "--env-file";
const ENV_FILE_ENV: &str = "FRENS_ENV_FILE";

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Finds the dotenv file before clap runs, since clap reads the `env`
/// fallbacks the file provides. Returns the path and whether it was named
/// explicitly.
pub(crate) fn resolve_env_file(
    args: &[OsString],
    env_override: Option<OsString>,
) -> (PathBuf, bool) {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let Some(arg) = arg.to_str() else {
            continue;
        };
        if arg == ENV_FILE_FLAG {
            if let Some(value) = iter.next() {
                return (PathBuf::from(value), true);
            }
        } else if let Some(value) = arg.strip_prefix("--env-file=") {
            return (PathBuf::from(value), true);
        }
    }
    match env_override.filter(|value| !value.is_empty()) {
        Some(value) => (PathBuf::from(value), true),
        None => (PathBuf::from(DEFAULT_ENV_FILE), false),
    }
}

/// Loads `path` into the process environment without overriding variables
/// that are already set. A missing file is only an error when it was
/// requested explicitly.
pub(crate) fn load_env_file(path: &Path, explicit: bool) -> Result<bool> {
    if !path.exists() && !explicit {
        return Ok(false);
    }
    dotenvy::from_path(path)
        .with_context(|| format!("failed to load env file {}", path.display()))?;
    Ok(true)
}

pub(crate) fn load_env_file_from_args(args: &[OsString]) -> Result<Option<PathBuf>> {
    let (path, explicit) = resolve_env_file(args, std::env::var_os(ENV_FILE_ENV));
    Ok(load_env_file(&path, explicit)?.then_some(path))
}
