/// Current local time as an RFC 3339 string, the timestamp format used by
/// every persisted record.
pub fn now_iso() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Truncate a string to at most `max` characters without splitting a
/// UTF-8 sequence.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
