//! Human-readable byte sizes, rates, and durations for console output.

/// Converts bytes to human-readable file size format.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Transfer rate as size-per-second.
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_size(bytes_per_sec.max(0.0) as u64))
}

/// Seconds remaining as Xs, Xm, Xh; em-dash when unknown.
pub fn format_eta(eta: Option<u64>) -> String {
    match eta {
        None => "--".to_owned(),
        Some(secs) if secs < 60 => format!("{}s", secs),
        Some(secs) if secs < 3600 => format!("{}m{:02}s", secs / 60, secs % 60),
        Some(secs) => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(format_size(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(2048.0), "2.00 KB/s");
        assert_eq!(format_rate(-1.0), "0 B/s");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(30)), "30s");
        assert_eq!(format_eta(Some(90)), "1m30s");
        assert_eq!(format_eta(Some(7260)), "2h01m");
    }
}
