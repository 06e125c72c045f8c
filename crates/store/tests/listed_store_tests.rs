use chrono::NaiveDate;
use kabu_core::market::entity::ListedInfo;
use kabu_core::store::port::ListedInfoStore;
use kabu_store::listed::SqliteListedInfoStore;
use tempfile::tempdir;

fn info(code: &str, date: NaiveDate, name: &str) -> ListedInfo {
    ListedInfo {
        date,
        code: code.to_string(),
        company_name: name.to_string(),
        company_name_english: format!("{name} Corp"),
        sector17_code: "6".into(),
        sector17_code_name: "自動車・輸送機".into(),
        sector33_code: "3700".into(),
        sector33_code_name: "輸送用機器".into(),
        scale_category: "TOPIX Core30".into(),
        market_code: "0111".into(),
        market_code_name: "プライム".into(),
    }
}

#[tokio::test]
async fn test_listed_info_save_and_load() {
    let tmp = tempdir().unwrap();
    let store = SqliteListedInfoStore::with_root(tmp.path());
    let d1 = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
    let d2 = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();

    // 表不存在时读取为空
    assert!(store.load_listed_info(None, None).await.unwrap().is_empty());

    let rows = vec![
        info("72030", d1, "トヨタ"),
        info("67580", d1, "ソニー"),
        info("72030", d2, "トヨタ"),
        // 批内重复保留第一条
        info("72030", d1, "重複"),
    ];
    let inserted = store.save_listed_info(&rows).await.unwrap();
    assert_eq!(inserted, 3);
    assert!(tmp.path().join("stocks").join("listed_info.db").exists());

    // 再次保存不产生新行
    assert_eq!(store.save_listed_info(&rows).await.unwrap(), 0);

    // Date 降序、Code 升序
    let all = store.load_listed_info(None, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].date, d2);
    assert_eq!(all[1].code, "67580");
    assert_eq!(all[2].code, "72030");
    assert_eq!(all[2].company_name, "トヨタ");

    let toyota = store.load_listed_info(Some("72030"), None).await.unwrap();
    assert_eq!(toyota.len(), 2);

    let one_day = store.load_listed_info(None, Some(d1)).await.unwrap();
    assert_eq!(one_day.len(), 2);

    let exact = store.load_listed_info(Some("67580"), Some(d2)).await.unwrap();
    assert!(exact.is_empty());
}

#[tokio::test]
async fn test_empty_listed_info_is_noop() {
    let tmp = tempdir().unwrap();
    let store = SqliteListedInfoStore::with_root(tmp.path());
    assert_eq!(store.save_listed_info(&[]).await.unwrap(), 0);
    assert!(!tmp.path().join("stocks").exists());
}

#[tokio::test]
async fn test_disabled_listed_store_is_inert() {
    let tmp = tempdir().unwrap();
    let d1 = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
    let rows = vec![info("72030", d1, "トヨタ")];

    let disabled = SqliteListedInfoStore::with_root(tmp.path()).with_enabled(false);
    assert_eq!(disabled.save_listed_info(&rows).await.unwrap(), 0);
    assert!(!tmp.path().join("stocks").join("listed_info.db").exists());

    // 已有数据时关闭的存储也读不到
    let enabled = SqliteListedInfoStore::with_root(tmp.path());
    assert_eq!(enabled.save_listed_info(&rows).await.unwrap(), 1);
    assert!(disabled.load_listed_info(None, None).await.unwrap().is_empty());
}
