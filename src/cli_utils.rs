/// CLI utilities for consistent output formatting
use std::io::IsTerminal;

/// Get a colored prefix
///
/// Returns bright cyan if stderr is a TTY, plain text otherwise.
pub fn weft_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[96m[weft]\x1b[0m"
    } else {
        "[weft]"
    }
}

/// Render a TTL in seconds as `1h 2m 3s` (`none` for zero, `default` when unset)
pub fn format_ttl(seconds: Option<u64>) -> String {
    let Some(total) = seconds else {
        return "default".to_string();
    };
    if total == 0 {
        return "none".to_string();
    }

    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if secs > 0 {
        parts.push(format!("{}s", secs));
    }
    parts.join(" ")
}
