//! System helpers
//!
//! Cache location and worker thread sizing.

use std::path::PathBuf;

/// Per-application cache directory (e.g. `~/.cache/<app>` on Linux)
///
/// Falls back to the system temp directory when no cache directory is known.
pub fn get_cache_dir(app_name: &str) -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(app_name)
}

/// Threads to use for multi-threaded decompression
///
/// Leaves one core free for the async runtime, capped at 8.
pub fn get_recommended_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).clamp(1, 8))
        .unwrap_or(1)
}
