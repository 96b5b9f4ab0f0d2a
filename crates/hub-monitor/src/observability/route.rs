//! Route normalization for low-cardinality metric labels.

/// Placeholder for numeric and 24-hex object ids.
pub const ID_PLACEHOLDER: &str = ":id";
/// Placeholder for canonical hyphenated UUIDs.
pub const UUID_PLACEHOLDER: &str = ":uuid";

/// Collapse identifier segments of a URL path into placeholders.
///
/// - all-digit segments become `:id`
/// - canonical UUIDs (8-4-4-4-12 hex) become `:uuid`
/// - 24-character hex ids become `:id`
///
/// Duplicate slashes are collapsed and a trailing slash is dropped, so the
/// result is stable under repeated normalization. An empty path maps to `/`.
///
/// ```
/// use hub_monitor::observability::route::normalize;
///
/// assert_eq!(normalize("/orgs/42/members"), "/orgs/:id/members");
/// assert_eq!(
///     normalize("/hosts/550e8400-e29b-41d4-a716-446655440000"),
///     "/hosts/:uuid"
/// );
/// ```
pub fn normalize(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(normalize_segment(segment));
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

fn normalize_segment(segment: &str) -> &str {
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        ID_PLACEHOLDER
    } else if is_uuid(segment) {
        UUID_PLACEHOLDER
    } else if segment.len() == 24 && segment.bytes().all(|b| b.is_ascii_hexdigit()) {
        ID_PLACEHOLDER
    } else {
        segment
    }
}

fn is_uuid(segment: &str) -> bool {
    segment.len() == 36
        && segment.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

/// Paths that are never instrumented: health probes, metric scrapes and the favicon.
pub fn is_excluded(path: &str) -> bool {
    path.starts_with("/health")
        || path == "/metrics"
        || path.starts_with("/metrics/")
        || path == "/favicon.ico"
}
