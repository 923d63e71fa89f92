use crate::domain::{CollectorError, FetchError, Page, PageCursor, RetryPolicy};
use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A single upstream endpoint that serves result pages
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the page at `cursor`, or the first page when `None`
    async fn fetch_page(&self, cursor: Option<PageCursor>) -> Result<Page, FetchError>;
}

enum Position {
    First,
    At(PageCursor),
    Finished,
}

/// Lazily follow the page chain of `source` until it reports no next page.
///
/// A transient failure re-requests the same page, at most
/// `policy.max_attempts` times in total. Any other failure, or an exhausted
/// retry budget, yields one error and ends the stream. Every new stream
/// starts again from the first page.
pub fn paginate(
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
) -> impl Stream<Item = Result<Page, CollectorError>> + Send {
    stream::unfold((Position::First, 1usize), move |(position, page_number)| {
        let source = Arc::clone(&source);
        let policy = policy.clone();
        async move {
            let cursor = match position {
                Position::Finished => return None,
                Position::First => None,
                Position::At(cursor) => Some(cursor),
            };

            match fetch_with_retry(source.as_ref(), cursor, &policy, page_number).await {
                Ok(page) => {
                    let next = match &page.next {
                        Some(cursor) => Position::At(cursor.clone()),
                        None => {
                            debug!(pages = page_number, "reached last page");
                            Position::Finished
                        }
                    };
                    Some((Ok(page), (next, page_number + 1)))
                }
                Err(e) => Some((Err(e), (Position::Finished, page_number))),
            }
        }
    })
}

/// Drain a page stream into its items, stopping at the first error
pub async fn collect_items<S>(pages: S) -> Result<Vec<Value>, CollectorError>
where
    S: Stream<Item = Result<Page, CollectorError>>,
{
    pages
        .try_fold(Vec::new(), |mut items, page| async move {
            items.extend(page.items);
            Ok(items)
        })
        .await
}

async fn fetch_with_retry(
    source: &dyn PageSource,
    cursor: Option<PageCursor>,
    policy: &RetryPolicy,
    page_number: usize,
) -> Result<Page, CollectorError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match source.fetch_page(cursor.clone()).await {
            Ok(page) => return Ok(page),
            Err(e) => e,
        };

        let Some(kind) = error.transient_kind() else {
            warn!(page = page_number, error = %error, "fatal error fetching page");
            return Err(CollectorError::Fatal {
                page: page_number,
                source: error,
            });
        };

        if attempt >= policy.max_attempts {
            warn!(
                page = page_number,
                attempts = attempt,
                kind = %kind,
                "giving up on page after transient failures"
            );
            return Err(CollectorError::RetriesExhausted {
                page: page_number,
                attempts: attempt,
                kind,
            });
        }

        let delay = policy.backoff(attempt);
        warn!(
            page = page_number,
            attempt,
            kind = %kind,
            delay_ms = delay.as_millis() as u64,
            "transient error fetching page, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransientKind;
    use futures::StreamExt;
    use mockall::Sequence;
    use serde_json::json;
    use std::time::Duration;

    fn cursor(n: usize) -> PageCursor {
        PageCursor::After(json!(format!("cursor-{n}")))
    }

    /// Source serving `total` pages, each holding one item
    fn chained_source(total: usize) -> MockPageSource {
        let mut source = MockPageSource::new();
        source.expect_fetch_page().returning(move |requested| {
            let index = match requested {
                None => 1,
                Some(PageCursor::After(v)) => {
                    v.as_str().unwrap().trim_start_matches("cursor-").parse::<usize>().unwrap() + 1
                }
                Some(other) => panic!("unexpected cursor {other:?}"),
            };
            let next = (index < total).then(|| cursor(index));
            Ok(Page::new(vec![json!({ "page": index })], next))
        });
        source
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(10), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_yields_exactly_n_pages() {
        for total in [1, 2, 7] {
            let pages: Vec<_> = paginate(Arc::new(chained_source(total)), fast_policy(3))
                .collect()
                .await;

            assert_eq!(pages.len(), total);
            assert!(pages.iter().all(|p| p.is_ok()));
            let last = pages.last().unwrap().as_ref().unwrap();
            assert!(last.next.is_none());
        }
    }

    #[tokio::test]
    async fn test_collect_items_concatenates_pages() {
        let items = collect_items(paginate(Arc::new(chained_source(3)), fast_policy(3)))
            .await
            .unwrap();

        assert_eq!(
            items,
            vec![json!({"page": 1}), json!({"page": 2}), json!({"page": 3})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_transient_failure_is_bounded() {
        let mut source = MockPageSource::new();
        source
            .expect_fetch_page()
            .times(4)
            .returning(|_| Err(FetchError::Transient(TransientKind::ServiceUnavailable)));

        let pages: Vec<_> = paginate(Arc::new(source), fast_policy(4)).collect().await;

        assert_eq!(pages.len(), 1);
        match &pages[0] {
            Err(CollectorError::RetriesExhausted {
                page,
                attempts,
                kind,
            }) => {
                assert_eq!(*page, 1);
                assert_eq!(*attempts, 4);
                assert_eq!(*kind, TransientKind::ServiceUnavailable);
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_same_cursor() {
        let mut seq = Sequence::new();
        let mut source = MockPageSource::new();
        source
            .expect_fetch_page()
            .withf(|c| c.is_none())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Page::new(vec![json!(1)], Some(cursor(1)))));
        source
            .expect_fetch_page()
            .withf(|c| *c == Some(cursor(1)))
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(FetchError::Transient(TransientKind::BadGateway)));
        source
            .expect_fetch_page()
            .withf(|c| *c == Some(cursor(1)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Page::last(vec![json!(2)])));

        let items = collect_items(paginate(Arc::new(source), fast_policy(5)))
            .await
            .unwrap();

        assert_eq!(items, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_without_retry() {
        let mut seq = Sequence::new();
        let mut source = MockPageSource::new();
        source
            .expect_fetch_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Page::new(vec![json!(1)], Some(cursor(1)))));
        source
            .expect_fetch_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(FetchError::Unauthorized(401)));

        let pages: Vec<_> = paginate(Arc::new(source), fast_policy(5)).collect().await;

        assert_eq!(pages.len(), 2);
        assert!(pages[0].is_ok());
        assert!(matches!(
            pages[1],
            Err(CollectorError::Fatal {
                page: 2,
                source: FetchError::Unauthorized(401)
            })
        ));
    }

    #[tokio::test]
    async fn test_each_stream_restarts_from_first_page() {
        let mut source = MockPageSource::new();
        source
            .expect_fetch_page()
            .withf(|c| c.is_none())
            .times(2)
            .returning(|_| Ok(Page::last(vec![json!("only")])));
        let source: Arc<dyn PageSource> = Arc::new(source);

        for _ in 0..2 {
            let items = collect_items(paginate(Arc::clone(&source), fast_policy(1)))
                .await
                .unwrap();
            assert_eq!(items, vec![json!("only")]);
        }
    }
}
