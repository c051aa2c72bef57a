//! Utility functions for fleetconf

use std::time::Duration;

/// Format an elapsed duration for status lines (e.g. "850ms", "42s", "3m 07s", "2h 05m")
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs == 0 {
        return format!("{}ms", elapsed.as_millis());
    }
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Render a fraction as a whole percentage; an empty total counts as complete
pub fn percent(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(850)), "850ms");
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42s");
        assert_eq!(format_elapsed(Duration::from_secs(187)), "3m 07s");
        assert_eq!(format_elapsed(Duration::from_secs(7500)), "2h 05m");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
    }
}
