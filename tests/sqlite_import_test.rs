// ==========================================
// SQLite 持久化导入测试
// ==========================================
// 测试目标: ImportApi::open 组装、config_kv 覆写、历史与记录落库
// ==========================================


use recall_import::api::{ApiError, ImportApi, ImportRequest};
use recall_import::config::{config_keys, ConfigManager};
use recall_import::domain::{ImportErrorKind, ImportJobFilter, ImportStatus, SourceFormat};
use recall_import::logging;
use recall_import::repository::{ImportHistoryStore, SqliteHistoryStore, SqliteRecordRepository};
use std::collections::BTreeMap;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(5);

fn defaults() -> BTreeMap<String, String> {
    let mut defaults = BTreeMap::new();
    defaults.insert("source_reference".to_string(), "https://www.cpsc.gov".to_string());
    defaults.insert("issuing_authority".to_string(), "CPSC".to_string());
    defaults
}

#[tokio::test]
async fn test_import_persists_history_and_records() {
    logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");

    let api = ImportApi::open(&db_path).unwrap();
    let request = ImportRequest {
        content: b"Recall Number\tProduct\tUnits\n24-001\tBaby walker\t1 200\n24-002\tHeater\t\n"
            .to_vec(),
        filename: Some("cpsc_2024.tsv".to_string()),
        default_context: defaults(),
        ..Default::default()
    };

    let submitted = api.submit_import(request).await.unwrap();
    let status = api
        .wait_for_terminal(&submitted.import_id, POLL)
        .await
        .unwrap();

    assert_eq!(status.status, ImportStatus::Completed);
    assert_eq!(status.detected_format, Some(SourceFormat::Tabular));
    assert_eq!(status.success_count, 2);
    assert_eq!(status.progress, Some(1.0));
    drop(api);

    // 重新打开: 历史与记录均已落库
    let history = SqliteHistoryStore::new(&db_path).unwrap();
    let job = history.get_job(&submitted.import_id).await.unwrap().unwrap();
    assert_eq!(job.status, ImportStatus::Completed);
    let transitions = history.list_transitions(&submitted.import_id).await.unwrap();
    assert_eq!(transitions.len(), 2);

    let records = SqliteRecordRepository::new(&db_path).unwrap();
    let walker = records.find_by_identifier("24-001").unwrap().unwrap();
    assert_eq!(walker.title, "Baby walker");
    assert_eq!(walker.units_affected, Some(1200));
    assert_eq!(walker.issuing_authority, "CPSC");
    assert_eq!(records.count_by_import(&submitted.import_id).unwrap(), 2);
}

#[tokio::test]
async fn test_config_overrides_applied() {
    logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");

    let config = ConfigManager::new(&db_path).unwrap();
    config.set_config_value(config_keys::ERROR_CAP, "2").unwrap();
    drop(config);

    let api = ImportApi::open(&db_path).unwrap();
    let request = ImportRequest {
        content: br#"[{"id": "1"}, {"id": "2"}, {"id": "3"}, {"id": "4"}, {"id": "5"}]"#.to_vec(),
        filename: Some("bans.json".to_string()),
        default_context: defaults(),
        ..Default::default()
    };

    let submitted = api.submit_import(request).await.unwrap();
    let status = api
        .wait_for_terminal(&submitted.import_id, POLL)
        .await
        .unwrap();

    assert_eq!(status.status, ImportStatus::Failed);
    assert_eq!(status.failure_count, 5);
    assert_eq!(status.errors.len(), 2);
    assert_eq!(status.error_overflow, 3);
    assert!(status
        .errors
        .iter()
        .all(|e| e.kind == ImportErrorKind::ValidationError));
}

#[tokio::test]
async fn test_list_and_cancel_terminal_import() {
    logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let api = ImportApi::open(&db_path).unwrap();

    let mut ids = Vec::new();
    for (name, content) in [
        ("good.csv", b"id,title\nX-1,Lamp\n".to_vec()),
        ("bad.json", b"{\"unexpected_key\": []}".to_vec()),
    ] {
        let request = ImportRequest {
            content,
            filename: Some(name.to_string()),
            default_context: defaults(),
            ..Default::default()
        };
        let submitted = api.submit_import(request).await.unwrap();
        api.wait_for_terminal(&submitted.import_id, POLL)
            .await
            .unwrap();
        ids.push(submitted.import_id);
    }

    let failed = api
        .list_imports(&ImportJobFilter {
            status: Some(ImportStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].filename.as_deref(), Some("bad.json"));
    assert_eq!(failed[0].errors[0].kind, ImportErrorKind::FormatError);

    let by_name = api
        .list_imports(&ImportJobFilter {
            filename_contains: Some("good".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].import_id, ids[0]);

    let err = api.cancel_import(&ids[0]).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
    let err = api.cancel_import("no-such-import").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}
