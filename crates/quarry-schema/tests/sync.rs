//! Integration tests for in-place reconciliation and table rebuilds.

mod common;

use common::{column_row, index_row, live_users, row, setup, text, USERS_SCHEMA};
use quarry_core::SqlValue;
use quarry_schema::{SyncError, SyncMode, SyncOutcome, Synchronizer, TableSchema};

fn users_schema() -> TableSchema {
    TableSchema::from_json(USERS_SCHEMA).unwrap()
}

// ============================================================================
// create
// ============================================================================

#[test]
fn test_create_on_empty_database() {
    let (db, server) = setup();
    server.table_count(0);
    server.table_count(1);
    server.on_rows(
        "SHOW FULL COLUMNS",
        vec![
            column_row("id", "int", false, "PRI", None, "auto_increment"),
            column_row("name", "varchar(50)", false, "", Some(""), ""),
        ],
    );
    server.on_rows("SHOW INDEX", vec![index_row("PRIMARY", 1, "id", true)]);

    let sync = Synchronizer::new(&db);
    let outcome = sync.create("users", &users_schema()).unwrap();
    assert_eq!(outcome, SyncOutcome::Created);

    let writes = server.writes();
    assert_eq!(writes.len(), 4, "{writes:#?}");
    let temp = writes[0]
        .strip_prefix("CREATE TABLE `")
        .and_then(|rest| rest.split('`').next())
        .unwrap()
        .to_string();
    assert!(temp.starts_with("users_tmp_"), "{temp}");
    assert_eq!(
        writes[0],
        format!(
            "CREATE TABLE `{temp}` (`id` int NOT NULL, `name` varchar(50) NOT NULL DEFAULT '') \
             ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        )
    );
    assert_eq!(writes[1], format!("ALTER TABLE `{temp}` ADD PRIMARY KEY (`id`)"));
    assert_eq!(
        writes[2],
        format!("ALTER TABLE `{temp}` CHANGE `id` `id` int NOT NULL AUTO_INCREMENT")
    );
    assert_eq!(writes[3], format!("RENAME TABLE `{temp}` TO `users`"));

    // The created table compares equal to its own schema.
    assert!(sync.compare("users", &users_schema(), false, false));
    assert_eq!(server.writes().len(), 4);
}

#[test]
fn test_create_is_idempotent() {
    let (db, server) = setup();
    live_users(&server);

    let sync = Synchronizer::new(&db);
    assert_eq!(
        sync.create("users", &users_schema()).unwrap(),
        SyncOutcome::Unchanged
    );
    assert_eq!(
        sync.create("users", &users_schema()).unwrap(),
        SyncOutcome::Unchanged
    );
    assert!(server.writes().is_empty());
}

#[test]
fn test_rebuild_preserves_rows() {
    let (db, server) = setup();
    live_users(&server);
    server.on_rows(
        "SELECT * FROM `users`",
        vec![
            row(&[("id", SqlValue::Int(1)), ("name", text("ada"))]),
            row(&[("id", SqlValue::Int(2)), ("name", text("grace"))]),
        ],
    );

    let declared = TableSchema::from_json(
        r#"{
            "columns": {
                "id": {"type": "int", "auto_increment": true},
                "name": {"type": "varchar", "length": 50, "default": ""},
                "status": {"type": "varchar", "length": 10, "default": "new"}
            },
            "indexes": {"id": "primary_key"}
        }"#,
    )
    .unwrap();

    let outcome = Synchronizer::new(&db).create("users", &declared).unwrap();
    let SyncOutcome::Rebuilt {
        backup: Some(backup),
        rows,
    } = outcome
    else {
        panic!("expected a rebuild, got {outcome:?}");
    };
    assert_eq!(rows, 2);
    assert!(backup.starts_with("users_backup_"));

    let executed = server.executed();
    let inserts: Vec<_> = executed
        .iter()
        .filter(|e| e.sql.starts_with("INSERT"))
        .collect();
    assert_eq!(inserts.len(), 2);
    assert!(inserts[0].sql.ends_with("(`id`, `name`) VALUES (?, ?)"));
    assert_eq!(inserts[0].values, vec![SqlValue::Int(1), text("ada")]);
    assert_eq!(inserts[1].values, vec![SqlValue::Int(2), text("grace")]);

    let writes = server.writes();
    let start = writes.iter().position(|s| s == "START TRANSACTION").unwrap();
    let commit = writes.iter().position(|s| s == "COMMIT").unwrap();
    assert!(writes[start + 1..commit].iter().all(|s| s.starts_with("INSERT")));
    let rename = writes.last().unwrap();
    assert!(rename.starts_with(&format!("RENAME TABLE `users` TO `{backup}`, `users_tmp_")));
    assert!(rename.ends_with("` TO `users`"));
}

#[test]
fn test_rebuild_of_empty_table_drops_it() {
    let (db, server) = setup();
    live_users(&server);
    let declared = users_schema().with_comment("people");

    let outcome = Synchronizer::new(&db).create("users", &declared).unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Rebuilt {
            backup: None,
            rows: 0
        }
    );
    let writes = server.writes();
    assert!(writes[0].ends_with("COMMENT='people'"));
    assert!(!writes.iter().any(|s| s.starts_with("INSERT")));
    let rename = &writes[writes.len() - 2];
    assert!(rename.starts_with("RENAME TABLE `users` TO `users_backup_"));
    let backup = rename
        .strip_prefix("RENAME TABLE `users` TO `")
        .and_then(|rest| rest.split('`').next())
        .unwrap();
    assert_eq!(writes.last().unwrap(), &format!("DROP TABLE `{backup}`"));
}

#[test]
fn test_failed_copy_rolls_back_and_drops_temp_table() {
    let (db, server) = setup();
    live_users(&server);
    server.on_rows(
        "SELECT * FROM `users`",
        vec![row(&[("id", SqlValue::Int(1)), ("name", text("ada"))])],
    );
    server.on_error("INSERT INTO", "Duplicate entry '1' for key 'PRIMARY'");
    let declared = users_schema().with_comment("people");

    let err = Synchronizer::new(&db).create("users", &declared).unwrap_err();
    let SyncError::CopyFailed { table, .. } = err else {
        panic!("expected a copy failure, got {err:?}");
    };
    assert!(table.starts_with("users_tmp_"));

    let writes = server.writes();
    assert!(writes.contains(&String::from("ROLLBACK")));
    assert_eq!(writes.last().unwrap(), &format!("DROP TABLE `{table}`"));
    assert!(!writes.iter().any(|s| s.starts_with("RENAME")));
    assert!(!db.in_transaction());
    assert!(!db.is_busy());
}

#[test]
fn test_failed_commit_rolls_back_and_drops_temp_table() {
    let (db, server) = setup();
    live_users(&server);
    server.on_rows(
        "SELECT * FROM `users`",
        vec![row(&[("id", SqlValue::Int(1)), ("name", text("ada"))])],
    );
    server.on_error("COMMIT", "Deadlock found when trying to get lock");
    let declared = users_schema().with_comment("people");

    let err = Synchronizer::new(&db).create("users", &declared).unwrap_err();
    let SyncError::CopyFailed { table, .. } = err else {
        panic!("expected a copy failure, got {err:?}");
    };
    let writes = server.writes();
    let commit = writes.iter().position(|s| s == "COMMIT").unwrap();
    assert_eq!(writes[commit + 1], "ROLLBACK");
    assert_eq!(writes.last().unwrap(), &format!("DROP TABLE `{table}`"));
    assert!(!writes.iter().any(|s| s.starts_with("RENAME")));
    assert!(!db.in_transaction());
}

#[test]
fn test_failed_swap_drops_temp_table() {
    let (db, server) = setup();
    live_users(&server);
    server.on_rows(
        "SELECT * FROM `users`",
        vec![row(&[("id", SqlValue::Int(1)), ("name", text("ada"))])],
    );
    server.on_error("RENAME TABLE", "Table 'users_backup' already exists");
    let declared = users_schema().with_comment("people");

    let err = Synchronizer::new(&db).create("users", &declared).unwrap_err();
    assert!(matches!(err, SyncError::Query(_)), "{err:?}");
    let writes = server.writes();
    let temp = writes[0]
        .strip_prefix("CREATE TABLE `")
        .and_then(|rest| rest.split('`').next())
        .unwrap()
        .to_string();
    assert_eq!(writes.last().unwrap(), &format!("DROP TABLE `{temp}`"));
    assert!(!db.in_transaction());
}

#[test]
fn test_failed_index_step_drops_temp_table() {
    let (db, server) = setup();
    server.table_count(0);
    server.on_error("ADD PRIMARY KEY", "Multiple primary key defined");

    let err = Synchronizer::new(&db)
        .create("users", &users_schema())
        .unwrap_err();
    assert!(matches!(err, SyncError::Query(_)), "{err:?}");
    let writes = server.writes();
    assert_eq!(writes.len(), 3, "{writes:#?}");
    assert!(writes[2].starts_with("DROP TABLE `users_tmp_"));
}

#[test]
fn test_create_rejected_inside_transaction() {
    let (db, server) = setup();
    live_users(&server);
    db.begin().unwrap();
    let declared = users_schema().with_comment("people");

    assert_eq!(
        Synchronizer::new(&db).create("users", &declared),
        Err(SyncError::TransactionOpen(String::from("users")))
    );
    assert_eq!(server.writes(), vec!["START TRANSACTION"]);
    assert!(db.in_transaction());
    db.rollback().unwrap();
}

// ============================================================================
// compare
// ============================================================================

#[test]
fn test_compare_missing_table() {
    let (db, server) = setup();
    server.table_count(0);
    let sync = Synchronizer::new(&db);
    assert!(!sync.compare("users", &users_schema(), true, true));
    assert_eq!(
        sync.ensure("users", &users_schema(), SyncMode::Check),
        Err(SyncError::MissingTable(String::from("users")))
    );
    assert!(server.writes().is_empty());
}

#[test]
fn test_index_order_does_not_matter() {
    let (db, server) = setup();
    server.table_count(1);
    server.on_rows(
        "SHOW FULL COLUMNS",
        vec![
            column_row("a", "int", false, "MUL", None, ""),
            column_row("b", "int", false, "", None, ""),
        ],
    );
    server.on_rows(
        "SHOW INDEX",
        vec![index_row("a_b", 1, "a", false), index_row("a_b", 2, "b", false)],
    );
    let declared = TableSchema::from_json(
        r#"{"columns": {"a": {"type": "int"}, "b": {"type": "int"}}, "indexes": {"b,a": "index"}}"#,
    )
    .unwrap();

    assert!(Synchronizer::new(&db).compare("pairs", &declared, false, false));
    assert!(server.writes().is_empty());
}

#[test]
fn test_destructive_drop_needs_both_flags() {
    let (db, server) = setup();
    server.table_count(1);
    server.on_rows(
        "SHOW FULL COLUMNS",
        vec![
            column_row("id", "int", false, "PRI", None, "auto_increment"),
            column_row("name", "varchar(50)", false, "", Some(""), ""),
            column_row("legacy", "text", true, "", None, ""),
        ],
    );
    server.on_rows("SHOW INDEX", vec![index_row("PRIMARY", 1, "id", true)]);

    let sync = Synchronizer::new(&db);
    assert!(!sync.compare("users", &users_schema(), false, false));
    assert!(!sync.compare("users", &users_schema(), true, false));
    assert!(server.writes().is_empty());

    assert!(sync.compare("users", &users_schema(), true, true));
    assert_eq!(
        server.writes(),
        vec!["ALTER TABLE `users` DROP COLUMN `legacy`"]
    );
}

#[test]
fn test_update_adds_columns_and_indexes() {
    let (db, server) = setup();
    live_users(&server);
    let declared = TableSchema::from_json(
        r#"{
            "columns": {
                "id": {"type": "int", "auto_increment": true},
                "email": {"type": "varchar", "length": 255, "nullable": true},
                "name": {"type": "varchar", "length": 50, "default": ""}
            },
            "indexes": {"id": "primary_key", "email": "unique"}
        }"#,
    )
    .unwrap();

    let sync = Synchronizer::new(&db);
    assert!(!sync.compare("users", &declared, false, false));
    assert!(server.writes().is_empty());

    assert_eq!(
        sync.ensure("users", &declared, SyncMode::Update).unwrap(),
        SyncOutcome::Altered
    );
    let writes = server.writes();
    assert_eq!(
        writes[0],
        "ALTER TABLE `users` ADD COLUMN `email` varchar(255) NULL AFTER `id`, \
         ADD UNIQUE INDEX `email` (`email`)"
    );
    // The scripted server still reports the old column order, so the
    // column is moved into place as well.
    assert_eq!(
        writes[1],
        "ALTER TABLE `users` CHANGE `name` `name` varchar(50) NOT NULL DEFAULT '' AFTER `email`"
    );
}

#[test]
fn test_column_order_is_restored() {
    let (db, server) = setup();
    server.table_count(1);
    server.on_rows(
        "SHOW FULL COLUMNS",
        vec![
            column_row("name", "varchar(50)", false, "", Some(""), ""),
            column_row("id", "int", false, "PRI", None, "auto_increment"),
        ],
    );
    server.on_rows("SHOW INDEX", vec![index_row("PRIMARY", 1, "id", true)]);

    let sync = Synchronizer::new(&db);
    assert!(!sync.compare("users", &users_schema(), false, false));
    assert!(sync.compare("users", &users_schema(), true, false));
    assert_eq!(
        server.writes(),
        vec!["ALTER TABLE `users` CHANGE `id` `id` int NOT NULL AUTO_INCREMENT FIRST"]
    );
}

#[test]
fn test_table_comment_is_applied() {
    let (db, server) = setup();
    live_users(&server);
    let declared = users_schema().with_comment("people");

    let sync = Synchronizer::new(&db);
    assert!(!sync.compare("users", &declared, false, false));
    assert!(sync.compare("users", &declared, true, false));
    assert_eq!(
        server.writes(),
        vec!["ALTER TABLE `users` COMMENT = 'people'"]
    );
}

#[test]
fn test_failed_alter_reports_mismatch() {
    let (db, server) = setup();
    live_users(&server);
    server.on_error("ALTER TABLE", "Lock wait timeout exceeded");
    let declared = users_schema().with_comment("people");

    assert!(!Synchronizer::new(&db).compare("users", &declared, true, false));
    assert!(db.last_error().unwrap().contains("Lock wait timeout"));
}

#[test]
fn test_force_rebuilds_when_auto_increment_differs() {
    let (db, server) = setup();
    live_users(&server);
    let declared = TableSchema::from_json(
        r#"{
            "columns": {
                "id": {"type": "int"},
                "name": {"type": "varchar", "length": 50, "default": ""}
            },
            "indexes": {"id": "primary_key"}
        }"#,
    )
    .unwrap();

    let sync = Synchronizer::new(&db);
    assert!(matches!(
        sync.ensure("users", &declared, SyncMode::Destructive),
        Err(SyncError::AutoIncrementMismatch { .. })
    ));
    assert!(matches!(
        sync.ensure("users", &declared, SyncMode::Force),
        Ok(SyncOutcome::Rebuilt { .. })
    ));
    assert!(!server
        .writes()
        .iter()
        .any(|s| s.contains("AUTO_INCREMENT")));
}

#[test]
fn test_declared_integer_width_matches_widthless_live_column() {
    let (db, server) = setup();
    server.table_count(1);
    server.on_rows(
        "SHOW FULL COLUMNS",
        vec![
            column_row("id", "int unsigned", false, "PRI", None, "auto_increment"),
            column_row("name", "varchar(50)", false, "", Some(""), ""),
        ],
    );
    server.on_rows("SHOW INDEX", vec![index_row("PRIMARY", 1, "id", true)]);
    server.on_rows("TABLE_COMMENT", vec![row(&[("TABLE_COMMENT", text(""))])]);
    let declared = TableSchema::from_json(
        r#"{
            "columns": {
                "id": {"type": "int", "length": 10, "unsigned": true, "auto_increment": true},
                "name": {"type": "varchar", "length": 50, "default": ""}
            },
            "indexes": {"id": "primary_key"}
        }"#,
    )
    .unwrap();

    let sync = Synchronizer::new(&db);
    assert!(sync.compare("users", &declared, false, false));
    assert_eq!(sync.create("users", &declared).unwrap(), SyncOutcome::Unchanged);
    assert!(server.writes().is_empty());
}
