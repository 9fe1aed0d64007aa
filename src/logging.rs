//! Tracing setup for the `km` binary.
//!
//! A `--log-file` given on the command line is always used. Otherwise
//! interactive runs log to stderr and scheduled runs (no terminal on stdin)
//! append to the `[logging] file` from the config. A file that cannot be
//! opened falls back to stderr.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Chosen from the `-d` / `-v` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn from_flags(debug: bool, verbose: bool) -> Self {
        if debug {
            Verbosity::Debug
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }

    fn level(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Filter directives: the base level plus clamps for chatty dependencies.
pub fn directives(verbosity: Verbosity) -> String {
    let mut directives = vec![verbosity.level().to_string()];
    for noisy in ["sqlx", "hyper", "hyper_util", "reqwest"] {
        directives.push(format!("{}=warn", noisy));
    }
    directives.join(",")
}

fn build_env_filter(verbosity: Verbosity) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let filter_str = directives(verbosity);
    EnvFilter::try_new(&filter_str)
        .map_err(|e| anyhow::anyhow!("Invalid tracing filter '{}': {}", filter_str, e))
}

/// Where log lines go; `None` means stderr.
pub fn log_target<'a>(
    flag: Option<&'a Path>,
    configured: Option<&'a Path>,
    interactive: bool,
) -> Option<&'a Path> {
    match flag {
        Some(path) => Some(path),
        None if interactive => None,
        None => configured,
    }
}

pub fn init_logging(
    verbosity: Verbosity,
    flag: Option<&Path>,
    configured: Option<&Path>,
) -> anyhow::Result<()> {
    let filter = build_env_filter(verbosity)?;
    let interactive = atty::is(atty::Stream::Stdin);

    let file = log_target(flag, configured, interactive).and_then(|path| {
        open_append(path)
            .map_err(|e| eprintln!("warning: cannot open log file {}: {}", path.display(), e))
            .ok()
    });

    match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}

fn open_append(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}
