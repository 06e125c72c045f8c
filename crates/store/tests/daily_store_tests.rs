use chrono::NaiveDate;
use kabu_core::common::SecurityCode;
use kabu_core::market::entity::{PriceBar, QuoteBatch, QuoteDate, QuoteRow};
use kabu_core::store::port::{CacheMiss, CacheRead, PriceStore};
use kabu_store::daily::SqliteDailyStore;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::sync::Arc;
use tempfile::tempdir;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn bar(code: &str, date: NaiveDate, close: f64) -> PriceBar {
    PriceBar {
        code: code.to_string(),
        date,
        open: close - 1.0,
        high: close + 2.0,
        low: close - 2.0,
        close,
        volume: 10_000.0,
    }
}

fn code(raw: &str) -> SecurityCode {
    SecurityCode::parse(raw).unwrap()
}

// 2024-01-04 ~ 2024-01-12 之间的 7 个交易日
fn january_days() -> Vec<NaiveDate> {
    [4, 5, 8, 9, 10, 11, 12]
        .into_iter()
        .map(|d| day(2024, 1, d))
        .collect()
}

#[tokio::test]
async fn test_write_then_read_covered_range() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("7203");
    let bars: Vec<PriceBar> = january_days()
        .into_iter()
        .enumerate()
        .map(|(i, d)| bar("7203", d, 2500.0 + i as f64))
        .collect();

    let summary = store
        .write_daily(&c, QuoteBatch::from_bars(&bars), None, None)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 7);
    assert_eq!(summary.skipped, 0);

    // 库文件落在 {root}/stocks/7203.db
    assert!(tmp.path().join("stocks").join("7203.db").exists());

    let read = store
        .read_daily(&c, Some(day(2024, 1, 5)), Some(day(2024, 1, 10)))
        .await;
    let got = read.into_bars();
    assert_eq!(got.len(), 4);
    assert_eq!(got[0].date, day(2024, 1, 5));
    assert_eq!(got[3].date, day(2024, 1, 10));
    assert!(got.windows(2).all(|w| w[0].date < w[1].date));

    let meta = store.metadata(&c).await.unwrap().expect("metadata should exist");
    assert_eq!(meta.from_date, day(2024, 1, 4));
    assert_eq!(meta.to_date, day(2024, 1, 12));
    assert_eq!(meta.record_count, 7);
}

#[tokio::test]
async fn test_write_is_idempotent() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("6758");
    let bars: Vec<PriceBar> = january_days()
        .into_iter()
        .map(|d| bar("6758", d, 13_000.0))
        .collect();

    store
        .write_daily(&c, QuoteBatch::from_bars(&bars), None, None)
        .await
        .unwrap();
    let second = store
        .write_daily(&c, QuoteBatch::from_bars(&bars), None, None)
        .await
        .unwrap();

    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 7);
    let meta = store.metadata(&c).await.unwrap().unwrap();
    assert_eq!(meta.record_count, 7);
}

#[tokio::test]
async fn test_overlapping_write_keeps_existing_values_and_widens_metadata() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("7203");

    // 第一批：01-04 ~ 01-10 (5 行)
    let first: Vec<PriceBar> = january_days()[..5]
        .iter()
        .map(|d| bar("7203", *d, 2500.0))
        .collect();
    store
        .write_daily(&c, QuoteBatch::from_bars(&first), None, None)
        .await
        .unwrap();

    // 第二批：01-09 ~ 01-16，与第一批重叠两天且收盘价不同
    let mut second_days = january_days()[3..].to_vec();
    second_days.push(day(2024, 1, 15));
    second_days.push(day(2024, 1, 16));
    let second: Vec<PriceBar> = second_days.iter().map(|d| bar("7203", *d, 9999.0)).collect();
    let summary = store
        .write_daily(&c, QuoteBatch::from_bars(&second), None, None)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 4);
    assert_eq!(summary.skipped, 2);

    let meta = summary.metadata.unwrap();
    assert_eq!(meta.from_date, day(2024, 1, 4));
    assert_eq!(meta.to_date, day(2024, 1, 16));
    assert_eq!(meta.record_count, 9);

    // 重叠日期保留第一次写入的值
    let rows = store.read_daily(&c, None, None).await.into_bars();
    let overlap = rows.iter().find(|b| b.date == day(2024, 1, 9)).unwrap();
    assert_eq!(overlap.close, 2500.0);
    let fresh = rows.iter().find(|b| b.date == day(2024, 1, 16)).unwrap();
    assert_eq!(fresh.close, 9999.0);
}

#[tokio::test]
async fn test_overlap_scenario_first_week_of_january() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("7203");

    let first: Vec<PriceBar> = (1..=5).map(|d| bar("7203", day(2024, 1, d), 100.0)).collect();
    store
        .write_daily(&c, QuoteBatch::from_bars(&first), None, None)
        .await
        .unwrap();
    let second: Vec<PriceBar> = (4..=8).map(|d| bar("7203", day(2024, 1, d), 200.0)).collect();
    let summary = store
        .write_daily(&c, QuoteBatch::from_bars(&second), None, None)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.skipped, 2);

    let meta = store.metadata(&c).await.unwrap().unwrap();
    assert_eq!(meta.from_date, day(2024, 1, 1));
    assert_eq!(meta.to_date, day(2024, 1, 8));
    assert_eq!(meta.record_count, 8);

    let rows = store.read_daily(&c, None, None).await.into_bars();
    let overlap = rows.iter().find(|b| b.date == day(2024, 1, 4)).unwrap();
    assert_eq!(overlap.close, 100.0);
}

#[tokio::test]
async fn test_failed_insert_rolls_back_whole_batch() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("7203");
    store
        .write_daily(&c, QuoteBatch::from_bars(&[bar("7203", day(2024, 1, 1), 100.0)]), None, None)
        .await
        .unwrap();

    // 让 01-03 的插入在事务中途失败
    let options = SqliteConnectOptions::new().filename(tmp.path().join("stocks").join("7203.db"));
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    sqlx::query(
        r#"
        CREATE TRIGGER reject_third BEFORE INSERT ON stocks_daily
        WHEN NEW."Date" = '2024-01-03'
        BEGIN SELECT RAISE(ABORT, 'rejected by trigger'); END
        "#,
    )
    .execute(&mut conn)
    .await
    .unwrap();
    conn.close().await.unwrap();

    let batch = QuoteBatch::from_bars(&[
        bar("7203", day(2024, 1, 2), 101.0),
        bar("7203", day(2024, 1, 3), 102.0),
    ]);
    let result = store.write_daily(&c, batch, None, None).await;
    assert!(result.is_err());

    // 01-02 已插入的行随事务回滚，元数据保持原状
    let rows = store.read_daily(&c, None, None).await.into_bars();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].date, day(2024, 1, 1));
    let meta = store.metadata(&c).await.unwrap().unwrap();
    assert_eq!(meta.record_count, 1);
    assert_eq!(meta.to_date, day(2024, 1, 1));
}

#[tokio::test]
async fn test_metadata_never_shrinks() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("9984");

    let wide = vec![bar("9984", day(2024, 1, 4), 1.0), bar("9984", day(2024, 3, 29), 2.0)];
    store
        .write_daily(&c, QuoteBatch::from_bars(&wide), None, None)
        .await
        .unwrap();

    let narrow = vec![bar("9984", day(2024, 2, 1), 3.0)];
    let summary = store
        .write_daily(&c, QuoteBatch::from_bars(&narrow), None, None)
        .await
        .unwrap();

    let meta = summary.metadata.unwrap();
    assert_eq!(meta.from_date, day(2024, 1, 4));
    assert_eq!(meta.to_date, day(2024, 3, 29));
    assert_eq!(meta.record_count, 3);
}

#[tokio::test]
async fn test_intra_batch_duplicates_keep_last_arrival() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("8306");
    let d = day(2024, 1, 4);

    let batch = QuoteBatch::from_bars(&[bar("8306", d, 100.0), bar("8306", d, 200.0)]);
    let summary = store.write_daily(&c, batch, None, None).await.unwrap();
    assert_eq!(summary.inserted, 1);

    let rows = store.read_daily(&c, None, None).await.into_bars();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].close, 200.0);
}

#[tokio::test]
async fn test_uncovered_range_is_a_miss() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("7203");
    let bars: Vec<PriceBar> = january_days().into_iter().map(|d| bar("7203", d, 1.0)).collect();
    store
        .write_daily(&c, QuoteBatch::from_bars(&bars), None, None)
        .await
        .unwrap();

    // 请求起点早于已保存区间
    let read = store.read_daily(&c, Some(day(2023, 12, 1)), None).await;
    match read {
        CacheRead::Miss(CacheMiss::NotCovered(cov)) => {
            assert!(!cov.covered);
            assert_eq!(cov.saved_from, Some(day(2024, 1, 4)));
        }
        other => panic!("expected NotCovered, got {other:?}"),
    }

    // 请求终点晚于已保存区间
    let read = store.read_daily(&c, None, Some(day(2024, 2, 1))).await;
    assert!(matches!(read, CacheRead::Miss(CacheMiss::NotCovered(_))));
}

#[tokio::test]
async fn test_unknown_code_is_a_miss() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());

    let read = store.read_daily(&code("1301"), None, None).await;
    assert_eq!(read, CacheRead::Miss(CacheMiss::NoTable));
    assert!(store.metadata(&code("1301")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_suffixed_code_shares_trimmed_file() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("7203.JP");
    let bars: Vec<PriceBar> = january_days().into_iter().map(|d| bar("x", d, 1.0)).collect();

    store
        .write_daily(&c, QuoteBatch::from_bars(&bars), None, None)
        .await
        .unwrap();

    assert!(tmp.path().join("stocks").join("7203.db").exists());
    assert!(!tmp.path().join("stocks").join("7203.JP.db").exists());

    // 行以调用方的原始代码为键
    let rows = store.read_daily(&c, None, None).await.into_bars();
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().all(|b| b.code == "7203.JP"));
}

#[tokio::test]
async fn test_rejected_batches_write_nothing() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("4502");

    // 空批次
    let summary = store
        .write_daily(&c, QuoteBatch::default(), None, None)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 0);

    // 缺少收盘价
    let row = QuoteRow {
        date: Some(QuoteDate::Day(day(2024, 1, 4))),
        open: Some(1.0),
        high: Some(1.0),
        low: Some(1.0),
        close: None,
        volume: Some(1.0),
    };
    let summary = store
        .write_daily(&c, QuoteBatch::from_rows(vec![row]), None, None)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 0);
    assert!(summary.metadata.is_none());
    assert!(!tmp.path().join("stocks").join("4502.db").exists());
}

#[tokio::test]
async fn test_indexed_batch_promotes_dates() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path());
    let c = code("6501");

    let row = |close: f64| QuoteRow {
        date: None,
        open: Some(close),
        high: Some(close),
        low: Some(close),
        close: Some(close),
        volume: Some(100.0),
    };
    let batch = QuoteBatch::indexed(vec![
        (QuoteDate::Text("2024-01-04".into()), row(10.0)),
        (QuoteDate::Text("20240105".into()), row(11.0)),
    ]);
    let summary = store.write_daily(&c, batch, None, None).await.unwrap();
    assert_eq!(summary.inserted, 2);

    let rows = store.read_daily(&c, None, None).await.into_bars();
    assert_eq!(rows[1].date, day(2024, 1, 5));
    assert_eq!(rows[1].close, 11.0);
}

#[tokio::test]
async fn test_disabled_store_is_inert() {
    let tmp = tempdir().unwrap();
    let store = SqliteDailyStore::with_root(tmp.path()).with_enabled(false);
    let c = code("7203");

    let summary = store
        .write_daily(&c, QuoteBatch::from_bars(&[bar("7203", day(2024, 1, 4), 1.0)]), None, None)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(store.read_daily(&c, None, None).await, CacheRead::Miss(CacheMiss::Disabled));
    assert!(!tmp.path().join("stocks").exists());
}

#[tokio::test]
async fn test_unwritable_root_falls_back_without_error() {
    let tmp = tempdir().unwrap();
    // 根目录是一个普通文件，无法在其下创建目录
    let blocker = tmp.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();
    let store = SqliteDailyStore::with_root(&blocker);
    let c = code("7203");

    let summary = store
        .write_daily(&c, QuoteBatch::from_bars(&[bar("7203", day(2024, 1, 4), 1.0)]), None, None)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 1);

    // 内存库不跨操作保留数据
    assert!(!store.read_daily(&c, None, None).await.is_hit());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_do_not_duplicate() {
    let tmp = tempdir().unwrap();
    let store = Arc::new(SqliteDailyStore::with_root(tmp.path()));
    let c = code("7203");
    let bars: Vec<PriceBar> = january_days().into_iter().map(|d| bar("7203", d, 1.0)).collect();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let c = c.clone();
            let bars = bars.clone();
            tokio::spawn(async move {
                store
                    .write_daily(&c, QuoteBatch::from_bars(&bars), None, None)
                    .await
            })
        })
        .collect();

    let mut inserted = 0;
    for result in futures::future::join_all(handles).await {
        inserted += result.unwrap().unwrap().inserted;
    }
    assert_eq!(inserted, 7);

    let meta = store.metadata(&c).await.unwrap().unwrap();
    assert_eq!(meta.record_count, 7);
    assert_eq!(store.read_daily(&c, None, None).await.into_bars().len(), 7);
}
