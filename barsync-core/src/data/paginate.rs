//! Cursor pagination over a bounded-page upstream.
//!
//! Upstreams cap rows per call, so a window is walked page by page: the
//! cursor starts at `since_ms` and jumps to one millisecond after the last
//! timestamp of each page. Pages are throttled with a fixed delay.

use super::provider::{BarSource, DataError, PageRequest};
use polars::prelude::DataFrame;
use std::time::Duration;

/// Walks `[since_ms, until_ms)` one page at a time.
#[derive(Debug, Clone)]
pub struct Paginator {
    pub page_limit: usize,
    /// Sleep between consecutive page requests.
    pub delay: Duration,
    /// Upper bound on requests per window. `None` means unbounded.
    pub max_pages: Option<usize>,
}

impl Default for Paginator {
    fn default() -> Self {
        Self {
            page_limit: 1000,
            delay: Duration::from_millis(200),
            max_pages: None,
        }
    }
}

/// Concatenated raw rows of one window.
#[derive(Debug, Default)]
pub struct PagedFetch {
    pub frame: DataFrame,
    pub pages: usize,
    pub rows: usize,
    /// Error that ended the walk early, if any. Rows before it are kept.
    pub stopped_by: Option<DataError>,
}

impl PagedFetch {
    pub fn is_partial(&self) -> bool {
        self.stopped_by.is_some()
    }
}

impl Paginator {
    pub fn new(page_limit: usize, delay: Duration) -> Self {
        Self {
            page_limit,
            delay,
            max_pages: None,
        }
    }

    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Fetch every page of `[since_ms, until_ms)`.
    ///
    /// Ends on an empty page, a page without a usable last timestamp, a
    /// cursor past `until_ms`, or the first error. On error the rows already
    /// fetched are returned with `stopped_by` set.
    pub fn fetch_window(
        &self,
        source: &dyn BarSource,
        symbol: &str,
        interval: &str,
        since_ms: i64,
        until_ms: i64,
    ) -> PagedFetch {
        let mut out = PagedFetch::default();
        let mut cursor = since_ms;

        while cursor < until_ms {
            if self.max_pages.is_some_and(|max| out.pages >= max) {
                tracing::debug!(symbol, pages = out.pages, "page cap reached");
                break;
            }
            if out.pages > 0 && !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }

            let request = PageRequest {
                symbol,
                interval,
                since_ms: cursor,
                until_ms,
                limit: self.page_limit,
            };
            let page = match source.fetch_page(&request) {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(
                        symbol,
                        interval,
                        cursor,
                        pages = out.pages,
                        error = %e,
                        "pagination stopped early"
                    );
                    out.stopped_by = Some(e);
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            out.pages += 1;
            out.rows += page.frame.height();
            tracing::debug!(symbol, interval, cursor, rows = page.frame.height(), "page fetched");

            let last = page.last_stamp_ms;
            if let Err(e) = append(&mut out.frame, page.frame) {
                out.stopped_by = Some(e);
                break;
            }

            match last {
                // Never move backwards, even if a page ends before the cursor.
                Some(last) => cursor = (last + 1).max(cursor + 1),
                None => break,
            }
        }

        out
    }
}

fn append(acc: &mut DataFrame, page: DataFrame) -> Result<(), DataError> {
    if acc.width() == 0 {
        *acc = page;
        return Ok(());
    }
    acc.vstack_mut(&page)
        .map(|_| ())
        .map_err(|e| DataError::ResponseFormatChanged(format!("page columns differ: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{RawPage, SourceClock, SourceProfile, StampConvention};
    use crate::domain::{Period, SymbolInfo};
    use polars::prelude::*;
    use std::sync::Mutex;

    /// One row per integer stamp; pages of `page` rows.
    struct Counting {
        stamps: Vec<i64>,
        page: usize,
        fail_on: Option<usize>,
        /// Answer every request with this one stamp, whatever the cursor.
        stale: Option<i64>,
        seen: Mutex<Vec<i64>>,
    }

    impl Counting {
        fn new(stamps: Vec<i64>, page: usize) -> Self {
            Self {
                stamps,
                page,
                fail_on: None,
                stale: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl BarSource for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn profile(&self) -> SourceProfile {
            SourceProfile {
                stamps: StampConvention::OpenTime,
                clock: SourceClock::Utc,
                page_limit: self.page,
            }
        }

        fn interval_token(&self, period: Period) -> Result<&'static str, DataError> {
            Ok(period.as_str())
        }

        fn fetch_page(&self, request: &PageRequest<'_>) -> Result<RawPage, DataError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(request.since_ms);
            if self.fail_on == Some(seen.len()) {
                return Err(DataError::NetworkUnreachable("reset".into()));
            }
            if let Some(stamp) = self.stale {
                let frame = df!("open_time" => [stamp]).unwrap();
                return Ok(RawPage::new(frame, Some(stamp)));
            }
            let rows: Vec<i64> = self
                .stamps
                .iter()
                .copied()
                .filter(|s| *s >= request.since_ms && *s <= request.until_ms)
                .take(request.limit.min(self.page))
                .collect();
            let last = rows.iter().max().copied();
            let frame = df!("open_time" => rows).unwrap();
            Ok(RawPage::new(frame, last))
        }

        fn list_symbols(&self) -> Result<Vec<SymbolInfo>, DataError> {
            Ok(Vec::new())
        }
    }

    fn paginator(limit: usize) -> Paginator {
        Paginator::new(limit, Duration::ZERO)
    }

    #[test]
    fn walks_until_empty_page() {
        let source = Counting::new((0..25).collect(), 10);
        let fetched = paginator(10).fetch_window(&source, "X", "1m", 0, 100);

        assert_eq!(fetched.rows, 25);
        assert_eq!(fetched.pages, 3);
        assert!(!fetched.is_partial());
        // Cursor is last stamp + 1 each time, then one empty request.
        assert_eq!(*source.seen.lock().unwrap(), vec![0, 10, 20, 25]);
    }

    #[test]
    fn stops_when_cursor_passes_until() {
        let source = Counting::new((0..10).collect(), 10);
        let fetched = paginator(10).fetch_window(&source, "X", "1m", 0, 9);
        assert_eq!(fetched.pages, 1);
        assert_eq!(source.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn error_keeps_earlier_pages() {
        let mut source = Counting::new((0..30).collect(), 10);
        source.fail_on = Some(2);
        let fetched = paginator(10).fetch_window(&source, "X", "1m", 0, 100);

        assert_eq!(fetched.rows, 10);
        assert!(matches!(
            fetched.stopped_by,
            Some(DataError::NetworkUnreachable(_))
        ));
    }

    #[test]
    fn error_on_first_page_returns_nothing() {
        let mut source = Counting::new((0..30).collect(), 10);
        source.fail_on = Some(1);
        let fetched = paginator(10).fetch_window(&source, "X", "1m", 0, 100);

        assert_eq!(fetched.pages, 0);
        assert_eq!(fetched.frame.height(), 0);
        assert!(fetched.is_partial());
    }

    #[test]
    fn max_pages_caps_requests() {
        let source = Counting::new((0..100).collect(), 10);
        let fetched = paginator(10)
            .with_max_pages(Some(2))
            .fetch_window(&source, "X", "1m", 0, 1000);
        assert_eq!(fetched.pages, 2);
        assert_eq!(fetched.rows, 20);
    }

    #[test]
    fn stale_pages_still_advance_the_cursor() {
        let mut source = Counting::new(Vec::new(), 10);
        source.stale = Some(5);
        let fetched = paginator(10).fetch_window(&source, "X", "1m", 0, 10);

        // The first page moves past the stamp, later ones step by one.
        let seen = source.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![0, 6, 7, 8, 9]);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(fetched.pages, 5);
        assert!(!fetched.is_partial());
    }

    #[test]
    fn page_behind_the_cursor_does_not_rewind() {
        let mut source = Counting::new(Vec::new(), 10);
        source.stale = Some(-50);
        let fetched = paginator(10).fetch_window(&source, "X", "1m", 100, 103);

        assert_eq!(*source.seen.lock().unwrap(), vec![100, 101, 102]);
        assert_eq!(fetched.rows, 3);
    }

    #[test]
    fn empty_window_makes_one_request() {
        let source = Counting::new(Vec::new(), 10);
        let fetched = paginator(10).fetch_window(&source, "X", "1m", 0, 100);
        assert_eq!(fetched.pages, 0);
        assert_eq!(source.seen.lock().unwrap().len(), 1);
    }
}
