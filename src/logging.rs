use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_DIR_ENV: &str = "PARAGLIDING_LOG_DIR";
const LOG_FILE_PREFIX: &str = "paragliding.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static PANIC_HOOK: OnceLock<()> = OnceLock::new();

/// Installs stdout and daily-rolling file logging. `default_dir` is used
/// unless `PARAGLIDING_LOG_DIR` points somewhere else.
pub fn init(default_dir: &Path) -> Result<()> {
    if FILE_GUARD.get().is_some() {
        return Ok(());
    }

    let cwd = std::env::current_dir().context("failed to resolve current working directory")?;
    let log_dir = resolve_log_dir(std::env::var(LOG_DIR_ENV).ok(), &cwd, default_dir);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(&log_dir, LOG_FILE_PREFIX));
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        Ok(()) => {
            let _ = FILE_GUARD.set(guard);
            install_panic_hook();
        }
        Err(_) => drop(guard),
    }

    Ok(())
}

fn resolve_log_dir(override_dir: Option<String>, cwd: &Path, default_dir: &Path) -> PathBuf {
    match override_dir.map(|dir| dir.trim().to_string()) {
        Some(dir) if !dir.is_empty() => {
            let path = PathBuf::from(dir);
            if path.is_absolute() { path } else { cwd.join(path) }
        }
        _ => default_dir.to_path_buf(),
    }
}

fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                tracing::error!(
                    target: "panic",
                    file = location.file(),
                    line = location.line(),
                    message = %info
                );
            } else {
                tracing::error!(target: "panic", message = %info);
            }
            default_hook(info);
        }));
    });
}
