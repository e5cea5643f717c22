//! Pagination types and "time ago" formatting.

use mapstore_core::TICKS_PER_SECOND;

/// One entry in a paginated listing: the decoded key/value plus the
/// metadata a paginated listing requires alongside it.
#[derive(Debug, Clone)]
pub struct PagedEntry<K, V> {
    /// The entry's key.
    pub key: K,
    /// The entry's value.
    pub value: V,
    /// The opaque version token recorded at the entry's last write.
    pub version: String,
    /// Raw last-modified instant, in ticks since the fixed epoch.
    pub last_modified_ticks: i64,
    /// Human-readable "time ago" rendering of `last_modified_ticks` relative
    /// to the instant the page was computed.
    pub last_modified_human: String,
}

/// Result of [`super::MapEngine::get_entries_paged`].
#[derive(Debug, Clone)]
pub struct PagedResult<K, V> {
    /// The entries on this page.
    pub entries: Vec<PagedEntry<K, V>>,
    /// The requested page number (1-based).
    pub current_page: u64,
    /// The requested page size.
    pub page_size: u64,
    /// Total entry count: the map's cardinality with no search pattern, or
    /// the filtered count when a search pattern was supplied.
    pub total_count: u64,
    /// `ceil(total_count / page_size)`.
    pub total_pages: u64,
    /// Whether a page after `current_page` exists.
    pub has_next: bool,
    /// Whether a page before `current_page` exists.
    pub has_prev: bool,
}

/// Renders an instant (ticks since the fixed epoch) as a coarse "time ago"
/// string relative to `now_ticks`.
#[must_use]
pub fn format_time_ago(now_ticks: i64, then_ticks: i64) -> String {
    let delta_secs = (now_ticks - then_ticks).max(0) / TICKS_PER_SECOND;
    match delta_secs {
        0 => "just now".to_string(),
        1 => "1 second ago".to_string(),
        s if s < 60 => format!("{s} seconds ago"),
        s if s < 3600 => format!("{} minutes ago", s / 60),
        s if s < 86_400 => format!("{} hours ago", s / 3600),
        s => format!("{} days ago", s / 86_400),
    }
}

/// Computes `total_pages = ceil(total_count / page_size)`, with `page_size
/// == 0` treated as a single page covering everything.
#[must_use]
pub fn total_pages(total_count: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 1;
    }
    total_count.div_ceil(page_size).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_ago_buckets() {
        let now = 100 * TICKS_PER_SECOND;
        assert_eq!(format_time_ago(now, now), "just now");
        assert_eq!(format_time_ago(now, now - TICKS_PER_SECOND), "1 second ago");
        assert_eq!(
            format_time_ago(now, now - 30 * TICKS_PER_SECOND),
            "30 seconds ago"
        );
        assert_eq!(
            format_time_ago(now, now - 120 * TICKS_PER_SECOND),
            "2 minutes ago"
        );
        assert_eq!(
            format_time_ago(now, now - 7200 * TICKS_PER_SECOND),
            "2 hours ago"
        );
        assert_eq!(
            format_time_ago(now, now - 172_800 * TICKS_PER_SECOND),
            "2 days ago"
        );
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(1_000_000, 20), 50_000);
        assert_eq!(total_pages(21, 20), 2);
        assert_eq!(total_pages(0, 20), 1);
        assert_eq!(total_pages(5, 0), 1);
    }
}
