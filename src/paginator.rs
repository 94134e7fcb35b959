//! Exhausts an offset-paginated endpoint into a single list.
//!
//! Generalizes `api/workflows/utils.py::paginator`.

use crate::error::CsToolsResult;
use crate::logging::log_error;
use std::future::Future;

pub const DEFAULT_RECORD_SIZE: usize = 5_000;

/// Repeatedly calls `fetch_page(record_offset, record_size)` until a page
/// comes back empty or shorter than `record_size`. An error on a page is
/// logged and ends pagination; rows already accumulated are returned.
pub async fn paginate<F, Fut, T>(record_size: usize, mut fetch_page: F) -> Vec<T>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = CsToolsResult<Vec<T>>>,
{
    let mut data = Vec::new();

    loop {
        let page = match fetch_page(data.len(), record_size).await {
            Ok(page) => page,
            Err(e) => {
                log_error!(error = %e, records_so_far = data.len(), "pagination aborted by page error");
                break;
            }
        };

        if page.is_empty() {
            break;
        }

        let page_len = page.len();
        data.extend(page);

        if page_len < record_size {
            break;
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsToolsError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn exhausts_all_pages_in_order() {
        let backend: Vec<u32> = (0..23).collect();
        let result = paginate(10, |offset, size| {
            let page = backend
                .iter()
                .skip(offset)
                .take(size)
                .copied()
                .collect::<Vec<_>>();
            async move { Ok(page) }
        })
        .await;

        assert_eq!(result, backend);
    }

    #[tokio::test]
    async fn empty_backend_returns_empty() {
        let result: Vec<u32> = paginate(10, |_, _| async { Ok(Vec::new()) }).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn error_on_a_page_keeps_what_was_already_accumulated() {
        let calls = AtomicUsize::new(0);
        let result = paginate(10, |offset, size| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 1 {
                    Err(CsToolsError::request_failed("boom", None))
                } else {
                    Ok((offset..offset + size).collect::<Vec<_>>())
                }
            }
        })
        .await;

        assert_eq!(result.len(), 10);
    }
}
