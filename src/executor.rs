//! Dual-path read: one page of rows and the total count, fetched
//! concurrently under independent deadlines.

use std::time::Duration;

use tokio::time::timeout;

use crate::analytics::ContactReader;
use crate::error::{SearchError, SearchResult};
use crate::filter::Page;
use crate::models::ContactRecord;
use crate::predicate::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub rows: Duration,
    pub count: Duration,
}

/// Runs both paths to completion. If either fails the whole read fails; a
/// row-path error is reported in preference to a count-path error.
pub async fn fetch_rows_and_total(
    reader: &dyn ContactReader,
    predicate: &Predicate,
    page: Page,
    deadlines: Deadlines,
) -> SearchResult<(Vec<ContactRecord>, u64)> {
    let (rows, total) = tokio::join!(
        timeout(
            deadlines.rows,
            reader.fetch_page(predicate, page.size, page.offset())
        ),
        timeout(deadlines.count, reader.count(predicate)),
    );

    let rows = match rows {
        Err(_) => {
            return Err(SearchError::Timeout {
                path: "row",
                after: deadlines.rows,
            })
        }
        Ok(r) => r.map_err(SearchError::backend)?,
    };
    let total = match total {
        Err(_) => {
            return Err(SearchError::Timeout {
                path: "count",
                after: deadlines.count,
            })
        }
        Ok(t) => t.map_err(SearchError::backend)?,
    };

    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryStore;
    use crate::filter::{Combinator, SearchFilter};
    use crate::models::StoredContact;

    fn deadlines() -> Deadlines {
        Deadlines {
            rows: Duration::from_secs(2),
            count: Duration::from_secs(1),
        }
    }

    fn seeded(n: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.seed((0..n).map(|i| StoredContact {
            record: crate::models::ContactRecord {
                name: format!("person {}", i),
                ..Default::default()
            },
            upload_id: 1,
            created_at: i as i64,
        }));
        store
    }

    #[tokio::test]
    async fn returns_page_and_full_total() {
        let store = seeded(7);
        let p = Predicate::build(&SearchFilter::default(), Combinator::And);
        let (rows, total) =
            fetch_rows_and_total(&store, &p, Page { page: 2, size: 3 }, deadlines())
                .await
                .unwrap();
        assert_eq!(total, 7);
        let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["person 3", "person 2", "person 1"]);
        assert_eq!(store.read_calls(), 2);
    }

    #[tokio::test]
    async fn timeout_names_the_path() {
        let store = seeded(1);
        store.set_read_delay(Some(Duration::from_millis(200)));
        let p = Predicate::build(&SearchFilter::default(), Combinator::And);
        let err = fetch_rows_and_total(
            &store,
            &p,
            Page { page: 1, size: 10 },
            Deadlines {
                rows: Duration::from_secs(5),
                count: Duration::from_millis(20),
            },
        )
        .await
        .unwrap_err();
        match err {
            SearchError::Timeout { path, .. } => assert_eq!(path, "count"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_failure_is_surfaced() {
        let store = seeded(1);
        store.set_fail_reads(true);
        let p = Predicate::build(&SearchFilter::default(), Combinator::And);
        let err = fetch_rows_and_total(&store, &p, Page { page: 1, size: 10 }, deadlines())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Backend(_)));
    }
}
