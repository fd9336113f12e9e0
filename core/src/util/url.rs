/// Lowercased host of `raw`, or `None` for unparsable / host-less urls
/// (`data:`, `about:blank`, ...).
pub fn host_of(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
}

/// Normalizes a configured domain entry: accepts bare hosts as well as full
/// urls, strips a leading `*.` wildcard.
pub fn normalize_domain(entry: &str) -> String {
    let trimmed = entry.trim();
    let host = if trimmed.contains("://") {
        host_of(trimmed).unwrap_or_else(|| trimmed.to_string())
    } else {
        trimmed
            .split(['/', ':'])
            .next()
            .unwrap_or(trimmed)
            .to_string()
    };
    host.trim_start_matches("*.")
        .trim_end_matches('.')
        .to_ascii_lowercase()
}
