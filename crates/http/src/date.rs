//! Shared `Date` header value.
//!
//! Formatting an HTTP date on every response is wasteful, so one background task refreshes a
//! preformatted value and every exchange of a server reads the latest one.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use tokio::task::JoinHandle;

/// Refresh interval of the date value
pub const DATE_UPDATE_INTERVAL: Duration = Duration::from_millis(800);

#[derive(Debug)]
pub struct DateService {
    current: Arc<ArcSwap<Bytes>>,
    handle: JoinHandle<()>,
}

fn now() -> Bytes {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    Bytes::from_owner(buf)
}

impl DateService {
    /// Starts the refresh task on the current tokio runtime.
    pub fn start(update_interval: Duration) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(now()));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(update_interval).await;
                current_arc.store(Arc::new(now()));
            }
        });

        DateService { current, handle }
    }

    /// The current date, formatted per RFC 9110 as `Sun, 06 Nov 1994 08:49:37 GMT`.
    pub fn header_value(&self) -> Option<HeaderValue> {
        let date = self.current.load().as_ref().clone();
        HeaderValue::from_maybe_shared(date).ok()
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
