//! Formatting helpers for log output

pub const MB: u64 = 1024 * 1024;

/// Bytes as fractional megabytes
#[inline]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / MB as f64
}

/// Human-readable size, e.g. "1.5 GB" or "256 MB"
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == UNITS.len() - 1 {
        format!("{:.1} {}", value, UNITS[unit])
    } else {
        format!("{:.0} {}", value, UNITS[unit])
    }
}

/// Format a progress fraction for logs; negative values mean indeterminate
pub fn format_progress(progress: f64) -> String {
    if progress < 0.0 {
        "-".to_string()
    } else {
        format!("{:.1}%", progress * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "2 KB");
        assert_eq!(format_size(104857600), "100 MB");
        assert_eq!(format_size(1610612736), "1.5 GB");
    }

    #[test]
    fn test_format_progress() {
        assert_eq!(format_progress(-1.0), "-");
        assert_eq!(format_progress(0.0), "0.0%");
        assert_eq!(format_progress(0.9), "90.0%");
        assert_eq!(format_progress(1.0), "100.0%");
    }

    #[test]
    fn test_bytes_to_mb() {
        assert!((bytes_to_mb(0) - 0.0).abs() < f64::EPSILON);
        assert!((bytes_to_mb(10485760) - 10.0).abs() < f64::EPSILON);
    }
}
