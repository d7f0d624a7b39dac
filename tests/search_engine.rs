use std::sync::Arc;
use std::time::Duration;

use leadvault::analytics::{ContactReader, InMemoryStore};
use leadvault::config::SearchConfig;
use leadvault::error::SearchError;
use leadvault::filter::SearchFilter;
use leadvault::models::{ContactRecord, StoredContact};
use leadvault::search::{Caller, SearchEngine};
use leadvault::{db, migrate};
use sqlx::SqlitePool;
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    pool: SqlitePool,
    store: InMemoryStore,
    engine: SearchEngine,
}

fn contact(name: &str, email: &str, phone: &str, company: &str, created_at: i64) -> StoredContact {
    StoredContact {
        record: ContactRecord {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
            company: company.into(),
            ..Default::default()
        },
        upload_id: 1,
        created_at,
    }
}

async fn harness(daily_limit: i64) -> Harness {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("lv.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = InMemoryStore::new();
    store.seed([
        contact("Alice Smith", "alice@acme.io", "+1 (555) 010-0001", "Acme", 100),
        contact("Bob Jones", "bob@globex.com", "555.010.0002", "Globex", 200),
        contact("Carol White", "carol@initech.com", "", "Initech", 300),
    ]);

    let reader: Arc<dyn ContactReader> = Arc::new(store.clone());
    let config = SearchConfig {
        default_daily_limit: daily_limit,
        ..Default::default()
    };
    let engine = SearchEngine::new(reader, pool.clone(), config).unwrap();

    Harness {
        _tmp: tmp,
        pool,
        store,
        engine,
    }
}

fn caller(user: &str, device: &str) -> Caller {
    Caller {
        user_id: user.into(),
        device_fingerprint: device.into(),
        ip_address: "10.0.0.1".into(),
        user_agent: "test-agent".into(),
    }
}

fn by_company(company: &str) -> SearchFilter {
    SearchFilter {
        company: company.into(),
        ..Default::default()
    }
}

async fn used_today(h: &Harness, user: &str) -> i64 {
    h.engine.quota_status(user).await.unwrap().used
}

#[tokio::test]
async fn repeated_search_is_served_from_cache() {
    let h = harness(10).await;
    let c = caller("u1", "d1");

    let first = h.engine.search(&c, &by_company("acme"), None).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.total, 1);
    assert_eq!(first.rows[0].name, "Alice Smith");
    assert_eq!(h.store.read_calls(), 2);

    // Same normalized key: different case and padding.
    let second = h
        .engine
        .search(&c, &by_company("  ACME "), None)
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.rows, first.rows);
    assert_eq!(second.total, first.total);

    assert_eq!(h.store.read_calls(), 2);
    assert_eq!(used_today(&h, "u1").await, 1);
    let history = h.engine.history("u1", 1, 25).await.unwrap();
    assert_eq!(history.total_count, 1);
}

#[tokio::test]
async fn cache_is_per_device() {
    let h = harness(10).await;
    h.engine
        .search(&caller("u1", "d1"), &by_company("acme"), None)
        .await
        .unwrap();
    let other = h
        .engine
        .search(&caller("u1", "d2"), &by_company("acme"), None)
        .await
        .unwrap();
    assert!(!other.cached);
    assert_eq!(used_today(&h, "u1").await, 2);
}

#[tokio::test]
async fn new_search_replaces_cache_slot() {
    let h = harness(10).await;
    let c = caller("u1", "d1");

    h.engine.search(&c, &by_company("acme"), None).await.unwrap();
    h.engine.search(&c, &by_company("globex"), None).await.unwrap();
    let again = h.engine.search(&c, &by_company("acme"), None).await.unwrap();

    assert!(!again.cached);
    assert_eq!(h.store.read_calls(), 6);
    assert_eq!(used_today(&h, "u1").await, 3);

    let last = h.engine.last_search("u1", "d1").await.unwrap();
    assert_eq!(last.total, 1);
    assert_eq!(last.rows[0].company, "Acme");
    assert_eq!(last.filter.unwrap().company, "acme");
}

#[tokio::test]
async fn exhausted_quota_blocks_before_backend() {
    let h = harness(10).await;
    h.engine.quota().set_daily_limit("u1", 2).await.unwrap();
    let c = caller("u1", "d1");

    h.engine.search(&c, &by_company("acme"), None).await.unwrap();
    h.engine.search(&c, &by_company("globex"), None).await.unwrap();
    let reads = h.store.read_calls();

    let err = h
        .engine
        .search(&c, &by_company("initech"), None)
        .await
        .unwrap_err();
    match err {
        SearchError::QuotaExceeded { used, limit } => {
            assert_eq!((used, limit), (2, 2));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err_code(&h, &c).await, "too_many_requests");
    assert_eq!(h.store.read_calls(), reads);

    // The cached last search is still served.
    let cached = h.engine.search(&c, &by_company("globex"), None).await.unwrap();
    assert!(cached.cached);
    assert_eq!(h.store.read_calls(), reads);
}

async fn err_code(h: &Harness, c: &Caller) -> &'static str {
    h.engine
        .search(c, &by_company("initech"), None)
        .await
        .unwrap_err()
        .code()
}

#[tokio::test]
async fn zero_limit_rejects_everything() {
    let h = harness(0).await;
    let err = h
        .engine
        .search(&caller("u1", "d1"), &SearchFilter::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::QuotaExceeded { used: 0, limit: 0 }));
    assert_eq!(h.store.read_calls(), 0);
}

#[tokio::test]
async fn empty_results_are_free_and_not_cached() {
    let h = harness(10).await;
    let c = caller("u1", "d1");
    let nobody = SearchFilter {
        name: "nobody".into(),
        ..Default::default()
    };

    let out = h.engine.search(&c, &nobody, None).await.unwrap();
    assert_eq!(out.total, 0);
    assert!(out.rows.is_empty());
    assert_eq!(used_today(&h, "u1").await, 0);

    let again = h.engine.search(&c, &nobody, None).await.unwrap();
    assert!(!again.cached);
    assert_eq!(h.store.read_calls(), 4);
    assert_eq!(used_today(&h, "u1").await, 0);

    // Still audited.
    assert_eq!(h.engine.history("u1", 1, 25).await.unwrap().total_count, 2);
}

#[tokio::test]
async fn combinator_controls_clause_joining() {
    let h = harness(10).await;
    let base = SearchFilter {
        name: "alice".into(),
        company: "globex".into(),
        ..Default::default()
    };

    let and = h
        .engine
        .search(&caller("u1", "d1"), &base, None)
        .await
        .unwrap();
    assert_eq!(and.total, 0);

    let or = SearchFilter {
        logic: "or".into(),
        ..base
    };
    let or = h.engine.search(&caller("u1", "d1"), &or, None).await.unwrap();
    assert_eq!(or.total, 2);
    let names: Vec<_> = or.rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Bob Jones", "Alice Smith"]);
}

#[tokio::test]
async fn phone_matches_on_digits_only() {
    let h = harness(10).await;
    for (query, expected) in [
        ("5550100001", "Alice Smith"),
        ("(555) 010-0002", "Bob Jones"),
        ("010 0001", "Alice Smith"),
    ] {
        let f = SearchFilter {
            phone: query.into(),
            ..Default::default()
        };
        let out = h
            .engine
            .search(&caller("u1", query), &f, None)
            .await
            .unwrap();
        assert_eq!(out.total, 1, "query {query}");
        assert_eq!(out.rows[0].name, expected);
    }
}

#[tokio::test]
async fn pagination_is_clamped_and_ordered_newest_first() {
    let h = harness(10).await;
    let f = SearchFilter {
        page: 2,
        page_size: 1,
        ..Default::default()
    };
    let out = h.engine.search(&caller("u1", "d1"), &f, None).await.unwrap();
    assert_eq!(out.total, 3);
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].name, "Bob Jones");

    let oversized = SearchFilter {
        page: -3,
        page_size: 5000,
        ..Default::default()
    };
    let out = h
        .engine
        .search(&caller("u1", "d2"), &oversized, None)
        .await
        .unwrap();
    assert_eq!(out.rows.len(), 3);
    let history = h.engine.history("u1", 1, 25).await.unwrap();
    assert!(history.entries[0].normalized_key.ends_with("|page=1|size=100"));
}

#[tokio::test]
async fn backend_failure_leaves_no_trace() {
    let h = harness(10).await;
    h.store.set_fail_reads(true);
    let c = caller("u1", "d1");

    let err = h.engine.search(&c, &by_company("acme"), None).await.unwrap_err();
    assert!(matches!(err, SearchError::Backend(_)));
    assert_eq!(err.code(), "internal");

    assert_eq!(used_today(&h, "u1").await, 0);
    assert_eq!(h.engine.history("u1", 1, 25).await.unwrap().total_count, 0);
    let last = h.engine.last_search("u1", "d1").await.unwrap();
    assert!(last.rows.is_empty());
    assert!(last.filter.is_none());
}

#[tokio::test]
async fn row_timeout_override_applies() {
    let h = harness(10).await;
    h.store.set_read_delay(Some(Duration::from_millis(200)));

    let err = h
        .engine
        .search(
            &caller("u1", "d1"),
            &by_company("acme"),
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
    match err {
        SearchError::Timeout { path, after } => {
            assert_eq!(path, "row");
            assert_eq!(after, Duration::from_millis(20));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(used_today(&h, "u1").await, 0);
}

#[tokio::test]
async fn corrupt_snapshot_is_a_cache_miss() {
    let h = harness(10).await;
    let c = caller("u1", "d1");
    h.engine.search(&c, &by_company("acme"), None).await.unwrap();

    sqlx::query("UPDATE user_device_search_cache SET snapshot = 'not json'")
        .execute(&h.pool)
        .await
        .unwrap();

    let out = h.engine.search(&c, &by_company("acme"), None).await.unwrap();
    assert!(!out.cached);
    assert_eq!(out.total, 1);
    assert_eq!(h.store.read_calls(), 4);

    // The slot was rewritten and is usable again.
    let cached = h.engine.search(&c, &by_company("acme"), None).await.unwrap();
    assert!(cached.cached);
}

#[tokio::test]
async fn validation_errors_have_no_side_effects() {
    let h = harness(10).await;

    let err = h
        .engine
        .search_json(&caller("u1", "d1"), "{not json", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Validation(_)));
    assert_eq!(err.code(), "bad_request");

    let err = h
        .engine
        .search(&caller("  ", "d1"), &SearchFilter::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Validation(_)));

    assert_eq!(h.store.read_calls(), 0);
    assert_eq!(h.engine.history("u1", 1, 25).await.unwrap().total_count, 0);
}

#[tokio::test]
async fn search_json_accepts_camel_case_filters() {
    let h = harness(10).await;
    let out = h
        .engine
        .search_json(
            &caller("u1", "d1"),
            r#"{"logic":"OR","name":"carol","email":"globex","pageSize":10}"#,
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.total, 2);
}
