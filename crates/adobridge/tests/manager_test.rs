//! Tests for adobridge manager module

mod common;

use adobridge::prelude::*;
use common::{engine, engine_with, people_columns, person, CONN_STR};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn optimistic() -> RecordsetOptions {
    RecordsetOptions::default().with_lock_type(LockType::Optimistic)
}

// ==================== Connection Tests ====================

#[tokio::test]
async fn test_create_connection_opens_and_reuses_pool() {
    let (db, state) = engine();

    let a = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let b = db
        .create_vb6_connection(
            "Data Source=DB1;Initial Catalog=sales;UID=app;PWD=other",
            ProviderKind::MySql,
        )
        .await
        .unwrap();
    assert_ne!(a, b);

    let info = db.connection_info(&a).unwrap();
    assert_eq!(info.state, ConnectionState::Open);
    assert_eq!(info.provider, ProviderKind::MySql);
    assert_eq!(info.pool, "mysql://app@db1:3306/sales");

    assert_eq!(db.pools().get_status().total_pools, 1);
    assert_eq!(db.get_stats().connections, 2);
    // one warm connection, one opened for the second checkout
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_malformed_connection_string() {
    let (db, _) = engine();
    for bad in ["", "   ", "Server=db1;garbage", "Server=db1;Port=abc"] {
        let err = db
            .create_vb6_connection(bad, ProviderKind::MySql)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation, "input {:?}", bad);
    }
    assert_eq!(db.pools().get_status().total_pools, 0);
}

#[tokio::test]
async fn test_unregistered_provider() {
    let (db, _) = engine();
    let err = db
        .create_vb6_connection(CONN_STR, ProviderKind::Oracle)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ProviderFailure);
}

#[tokio::test]
async fn test_pool_exhaustion_times_out() {
    let (db, _) = engine();
    db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    let err = db
        .create_vb6_connection(CONN_STR, ProviderKind::MySql)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Timeout);
}

#[tokio::test]
async fn test_close_connection_releases_handle() {
    let (db, _) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let pool_status = || db.pools().get_status().pools[0].snapshot.clone();
    assert_eq!(pool_status().active_connections, 1);

    db.close_connection(&conn).await.unwrap();
    assert_eq!(pool_status().active_connections, 0);
    assert_eq!(pool_status().releases, 1);

    let err = db.close_connection(&conn).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);
    let err = db.execute_query(&conn, "SELECT 1", &[]).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);
}

// ==================== Query Tests ====================

#[tokio::test]
async fn test_identical_select_served_from_cache() {
    let (db, state) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let sql = "SELECT * FROM people WHERE age > ?";

    let first = db.execute_query(&conn, sql, &[Value::Int32(20)]).await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.row_count(), 3);

    let second = db.execute_query(&conn, sql, &[Value::Int32(20)]).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.data, first.data);
    assert_eq!(state.execute_count(), 1);

    let third = db.execute_query(&conn, sql, &[Value::Int32(21)]).await.unwrap();
    assert!(!third.from_cache);
    assert_eq!(state.execute_count(), 2);

    let info = db.connection_info(&conn).unwrap();
    assert_eq!(info.queries_executed, 3);
    assert_eq!(info.cache_hits, 1);
}

#[tokio::test]
async fn test_writes_bypass_cache_and_bind_parameters() {
    let (db, state) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let sql = "UPDATE people SET name = ? WHERE id = ?";
    let params = [Value::from("O'Hara"), Value::Int32(2)];

    let a = db.execute_query(&conn, sql, &params).await.unwrap();
    let b = db.execute_query(&conn, sql, &params).await.unwrap();
    assert_eq!(a.records_affected, 1);
    assert!(!b.from_cache);
    assert_eq!(
        state.executed(),
        vec![
            "UPDATE people SET name = 'O''Hara' WHERE id = 2".to_string(),
            "UPDATE people SET name = 'O''Hara' WHERE id = 2".to_string(),
        ]
    );
    assert_eq!(db.cache().get_stats().sets, 0);
}

#[tokio::test]
async fn test_empty_sql_and_placeholder_mismatch() {
    let (db, state) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    let err = db.execute_query(&conn, "  ", &[]).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);

    let err = db
        .execute_query(&conn, "SELECT * FROM people WHERE id = ?", &[])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert_eq!(state.execute_count(), 0);

    // the connection is usable afterwards
    let info = db.connection_info(&conn).unwrap();
    assert_eq!(info.state, ConnectionState::Open);
    assert_eq!(info.errors, 1);
    db.execute_query(&conn, "SELECT 1", &[]).await.unwrap();
}

#[tokio::test]
async fn test_driver_error_is_provider_failure() {
    let (db, state) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    state.fail_execute.store(true, Ordering::SeqCst);

    let err = db
        .execute_query(&conn, "DELETE FROM people", &[])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ProviderFailure);
    assert_eq!(err.provider_kind(), Some(ProviderKind::MySql));
    assert_eq!(db.get_stats().errors, 1);
}

#[tokio::test]
async fn test_large_results_not_cached() {
    let (db, state) = engine_with(QueryConfig {
        max_cached_rows: 3,
        ..QueryConfig::default()
    });
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    db.execute_query(&conn, "SELECT * FROM people", &[]).await.unwrap();
    let again = db.execute_query(&conn, "SELECT * FROM people", &[]).await.unwrap();
    assert!(!again.from_cache);
    assert_eq!(state.execute_count(), 2);
}

#[tokio::test]
async fn test_slow_queries_counted() {
    let (db, state) = engine_with(QueryConfig {
        slow_query_threshold_ms: 10,
        cache_enabled: false,
        ..QueryConfig::default()
    });
    *state.execute_delay.lock() = Duration::from_millis(30);
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    let result = db.execute_query(&conn, "SELECT * FROM people", &[]).await.unwrap();
    assert!(result.execution_time >= Duration::from_millis(30));
    assert_eq!(db.get_stats().slow_queries, 1);
}

#[tokio::test]
async fn test_read_mode_connection_refuses_writes() {
    let (db, _) = engine();
    let conn = db
        .create_vb6_connection(&format!("{};Mode=Read", CONN_STR), ProviderKind::MySql)
        .await
        .unwrap();

    db.execute_query(&conn, "SELECT * FROM people", &[]).await.unwrap();
    let err = db
        .execute_query(&conn, "DELETE FROM people", &[])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ReadOnly);
}

// ==================== Recordset Tests ====================

#[tokio::test]
async fn test_recordset_navigation_through_manager() {
    let (db, _) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let rs = db
        .create_recordset(&conn, "SELECT * FROM people", &[], RecordsetOptions::default())
        .await
        .unwrap();

    assert_eq!(rs.record_count, 3);
    assert_eq!((rs.position, rs.bof, rs.eof), (0, false, false));
    assert_eq!(rs.lock_type, LockType::ReadOnly);
    assert_eq!(rs.fields[0].field_type, FieldType::Integer);

    let view = db.move_last(&rs.id).unwrap();
    assert_eq!((view.position, view.bof, view.eof), (2, false, false));
    let view = db.move_next(&rs.id).unwrap();
    assert_eq!((view.position, view.eof), (2, true));
    assert!(view.current.is_none());

    db.move_first(&rs.id).unwrap();
    assert_eq!(db.get_field_value(&rs.id, "name").unwrap(), Value::from("Alice"));

    let err = db.set_field_value(&rs.id, "name", "Zed").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ReadOnly);
}

#[tokio::test]
async fn test_recordset_rows_do_not_alias_cache() {
    let (db, state) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    let rs = db
        .create_recordset(&conn, "SELECT * FROM people", &[], optimistic())
        .await
        .unwrap();
    db.set_field_value(&rs.id, "name", "Changed").unwrap();
    db.update(&rs.id).unwrap();

    let fresh = db
        .create_recordset(&conn, "SELECT * FROM people", &[], optimistic())
        .await
        .unwrap();
    assert_eq!(db.get_field_value(&fresh.id, "name").unwrap(), Value::from("Alice"));
    assert_eq!(state.execute_count(), 1);
}

#[tokio::test]
async fn test_recordset_crud_through_manager() {
    let (db, _) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let rs = db
        .create_recordset(&conn, "SELECT * FROM people", &[], optimistic())
        .await
        .unwrap();

    let view = db.add_new(&rs.id).unwrap();
    assert_eq!(view.record_count, 4);
    assert_eq!(view.edit_mode, EditMode::Add);
    db.set_field_value(&rs.id, "name", "Dave").unwrap();
    let view = db.cancel_update(&rs.id).unwrap();
    assert_eq!(view.record_count, 3);

    db.move_to(&rs.id, 1).unwrap();
    let view = db.delete(&rs.id).unwrap();
    assert_eq!(view.record_count, 2);
    assert_eq!(db.get_field_value(&rs.id, "name").unwrap(), Value::from("Carol"));

    assert!(db
        .find(&rs.id, "name = 'Alice'", false, SearchDirection::Backward)
        .unwrap());
    let view = db.filter(&rs.id, "age > 100").unwrap();
    assert!(view.bof && view.eof);
}

#[tokio::test]
async fn test_sort_and_get_rows_through_manager() {
    let (db, _) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let rs = db
        .create_recordset(&conn, "SELECT * FROM people", &[], RecordsetOptions::default())
        .await
        .unwrap();

    let view = db.sort(&rs.id, "age DESC").unwrap();
    assert_eq!(view.sort.as_deref(), Some("age DESC"));
    let names: Vec<String> = db
        .get_rows(&rs.id)
        .unwrap()
        .iter()
        .filter_map(|r| r.get_by_name("name").and_then(Value::as_string))
        .collect();
    assert_eq!(names, vec!["Carol", "Alice", "Bob"]);
}

#[tokio::test]
async fn test_max_records_and_empty_result() {
    let (db, state) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    let rs = db
        .create_recordset(
            &conn,
            "SELECT * FROM people",
            &[],
            RecordsetOptions::default().with_max_records(2),
        )
        .await
        .unwrap();
    assert_eq!(rs.record_count, 2);

    state.set_select_result(RawResult::rows(people_columns(), Vec::new()));
    let empty = db
        .create_recordset(&conn, "SELECT * FROM people WHERE 1 = 0", &[], optimistic())
        .await
        .unwrap();
    assert_eq!(empty.record_count, 0);
    assert!(empty.bof && empty.eof);
    assert_eq!(empty.fields.len(), 3);
    assert_eq!(
        db.get_field_value(&empty.id, "id").unwrap_err().category(),
        ErrorCategory::InvalidState
    );
}

#[tokio::test]
async fn test_requery_reloads_rows() {
    let (db, state) = engine_with(QueryConfig {
        cache_enabled: false,
        ..QueryConfig::default()
    });
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let rs = db
        .create_recordset(&conn, "SELECT * FROM people", &[], optimistic())
        .await
        .unwrap();
    db.move_last(&rs.id).unwrap();
    db.filter(&rs.id, "age < 30").unwrap();

    state.set_select_result(RawResult::rows(
        people_columns(),
        vec![person(9, "Zoe", 50)],
    ));
    let view = db.requery(&rs.id).await.unwrap();
    assert_eq!(view.record_count, 1);
    assert_eq!((view.position, view.bof, view.eof), (0, false, false));
    assert!(view.filter.is_none());
    assert_eq!(db.get_field_value(&rs.id, "name").unwrap(), Value::from("Zoe"));
    assert_eq!(state.execute_count(), 2);
}

#[tokio::test]
async fn test_close_connection_cascades_to_recordsets() {
    let (db, _) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let other = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    let a = db
        .create_recordset(&conn, "SELECT * FROM people", &[], RecordsetOptions::default())
        .await
        .unwrap();
    let b = db
        .create_recordset(&conn, "SELECT id FROM people", &[], RecordsetOptions::default())
        .await
        .unwrap();
    let c = db
        .create_recordset(&other, "SELECT * FROM people", &[], RecordsetOptions::default())
        .await
        .unwrap();
    assert_eq!(db.get_stats().recordsets, 3);

    db.close_connection(&conn).await.unwrap();

    for id in [&a.id, &b.id] {
        assert_eq!(
            db.move_first(id).unwrap_err().category(),
            ErrorCategory::NotFound
        );
    }
    assert!(db.move_first(&c.id).is_ok());
    assert_eq!(db.get_stats().recordsets, 1);
}

#[tokio::test]
async fn test_connection_closed_while_recordset_opens() {
    let (db, state) = engine();
    *state.execute_delay.lock() = Duration::from_millis(200);
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    let (opened, closed) = tokio::join!(
        db.create_recordset(&conn, "SELECT * FROM people", &[], RecordsetOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            db.close_connection(&conn).await
        }
    );

    closed.unwrap();
    assert_eq!(opened.unwrap_err().category(), ErrorCategory::InvalidState);
    assert_eq!(db.get_stats().recordsets, 0);
}

#[tokio::test]
async fn test_second_statement_while_executing_is_rejected() {
    let (db, state) = engine_with(QueryConfig {
        cache_enabled: false,
        ..QueryConfig::default()
    });
    *state.execute_delay.lock() = Duration::from_millis(200);
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();

    let (first, second) = tokio::join!(
        db.execute_query(&conn, "SELECT * FROM people", &[]),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            db.execute_query(&conn, "SELECT 1", &[]).await
        }
    );

    assert_eq!(first.unwrap().row_count(), 3);
    assert_eq!(second.unwrap_err().category(), ErrorCategory::InvalidState);
}

#[tokio::test]
async fn test_close_recordset() {
    let (db, _) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let rs = db
        .create_recordset(&conn, "SELECT * FROM people", &[], RecordsetOptions::default())
        .await
        .unwrap();

    db.close_recordset(&rs.id).unwrap();
    assert_eq!(
        db.close_recordset(&rs.id).unwrap_err().category(),
        ErrorCategory::NotFound
    );
    assert!(db.recordset_view(&rs.id).is_err());
}

// ==================== Status and Shutdown Tests ====================

#[tokio::test]
async fn test_status_reports_connections_and_recordsets() {
    let (db, _) = engine();
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    let rs = db
        .create_recordset(&conn, "SELECT * FROM people", &[], RecordsetOptions::default())
        .await
        .unwrap();

    let status = db.get_status().await;
    assert!(!status.shutting_down);
    assert!(status.cache_healthy);
    assert_eq!(status.connections.len(), 1);
    assert_eq!(status.connections[0].recordsets, vec![rs.id.clone()]);
    assert_eq!(status.pools.total_pools, 1);

    let stats = db.get_stats();
    assert_eq!(stats.queries_executed, 1);
    assert_eq!(stats.cache.sets, 1);
    assert!(serde_json::to_string(&stats).is_ok());
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let (db, state) = engine();
    db.cache().initialize().await;
    let conn = db.create_vb6_connection(CONN_STR, ProviderKind::MySql).await.unwrap();
    db.create_recordset(&conn, "SELECT * FROM people", &[], RecordsetOptions::default())
        .await
        .unwrap();

    db.shutdown().await;

    let stats = db.get_stats();
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.recordsets, 0);
    assert_eq!(stats.pools.total_pools, 0);
    assert_eq!(stats.cache.total_keys, 0);
    assert_eq!(
        state.closes.load(Ordering::SeqCst),
        state.connects.load(Ordering::SeqCst)
    );

    let err = db
        .create_vb6_connection(CONN_STR, ProviderKind::MySql)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidState);

    // idempotent
    db.shutdown().await;
}
