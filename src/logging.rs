//! Logging module
//!
//! Timestamped, module-tagged log lines written to stderr and to a
//! per-session log file in the cache directory. Debug output is only
//! emitted in developer mode.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Local;
use once_cell::sync::{Lazy, OnceCell};

use crate::config;
use crate::utils::get_cache_dir;

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_FILE: Lazy<Mutex<Option<File>>> = Lazy::new(|| Mutex::new(None));
static LOG_PATH: OnceCell<PathBuf> = OnceCell::new();

/// Open the session log file. Safe to call more than once.
pub fn init() {
    LOG_PATH.get_or_init(|| {
        let logs_dir = get_cache_dir(config::app::NAME).join(config::logging::LOGS_DIR);
        let path = logs_dir.join(format!(
            "{}.log",
            Local::now().format("%Y-%m-%d_%H-%M-%S")
        ));

        let file = std::fs::create_dir_all(&logs_dir).and_then(|_| {
            OpenOptions::new().create(true).append(true).open(&path)
        });

        match file {
            Ok(file) => {
                if let Ok(mut guard) = LOG_FILE.lock() {
                    *guard = Some(file);
                }
            }
            Err(e) => eprintln!("Failed to open log file {}: {}", path.display(), e),
        }

        path
    });
}

/// Enable or disable debug output (developer mode)
pub fn set_log_level(debug: bool) {
    DEBUG_ENABLED.store(debug, Ordering::SeqCst);
}

/// Whether debug output is currently enabled
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::SeqCst)
}

/// Path of the current session log, if [`init`] has run
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

#[doc(hidden)]
pub fn write(level: Level, module: &str, message: std::fmt::Arguments<'_>) {
    if level == Level::Debug && !is_debug_enabled() {
        return;
    }

    let line = format!(
        "[{}] [{}] [{}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        level.as_str(),
        module,
        message
    );

    eprintln!("{}", line);

    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

#[macro_export]
macro_rules! log_debug {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::write($crate::logging::Level::Debug, $module, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::write($crate::logging::Level::Info, $module, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::write($crate::logging::Level::Warn, $module, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::write($crate::logging::Level::Error, $module, format_args!($($arg)+))
    };
}
