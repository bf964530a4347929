//! End-to-end tests driving plan trees against a full engine instance.

use anyhow::Result;
use shaledb::access::value::{DataType, Value};
use shaledb::catalog::{Column, Schema};
use shaledb::concurrency::lock_manager::{AbortReason, LockMode, TransactionAbort};
use shaledb::database::{Database, Options};
use shaledb::expression::{CompareOp, Expression};
use shaledb::planner::physical::{AggregateFunction, JoinType, PlanNode, SortOrder};
use shaledb::transaction::state::{IsolationLevel, TransactionState};
use tempfile::tempdir;

fn create_db() -> Result<(Database, tempfile::TempDir)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir()?;
    let db = Database::create(&dir.path().join("test.db"), Options::default())?;
    Ok((db, dir))
}

fn int_rows(rows: &[Vec<i32>]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|r| r.iter().map(|&v| Value::Int32(v)).collect())
        .collect()
}

fn setup_users_and_orders(db: &Database) -> Result<()> {
    db.catalog.create_table(
        "users",
        Schema::new(vec![
            Column::new("id", DataType::Int32),
            Column::new("age", DataType::Int32),
        ]),
    )?;
    db.catalog.create_table(
        "orders",
        Schema::new(vec![
            Column::new("user_id", DataType::Int32),
            Column::new("amount", DataType::Int32),
        ]),
    )?;

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let users = db.catalog.table_by_name("users").unwrap();
    let orders = db.catalog.table_by_name("orders").unwrap();

    let inserted = db.execute(
        PlanNode::Insert {
            table_oid: users.oid,
            child: Box::new(PlanNode::Values {
                rows: int_rows(&[vec![1, 30], vec![2, 40], vec![3, 50]]),
            }),
        },
        &ctx,
    )?;
    assert_eq!(inserted, vec![vec![Value::Int32(3)]]);

    db.execute(
        PlanNode::Insert {
            table_oid: orders.oid,
            child: Box::new(PlanNode::Values {
                rows: int_rows(&[
                    vec![1, 100],
                    vec![1, 150],
                    vec![2, 200],
                    vec![9, 999],
                ]),
            }),
        },
        &ctx,
    )?;

    db.commit(&ctx.txn)?;
    Ok(())
}

#[test]
fn test_insert_scan_filter_pipeline() -> Result<()> {
    let (db, _dir) = create_db()?;
    setup_users_and_orders(&db)?;
    let users = db.catalog.table_by_name("users").unwrap();

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let rows = db.execute(
        PlanNode::Filter {
            predicate: Expression::compare(
                CompareOp::GreaterThan,
                Expression::column(1),
                Expression::literal(Value::Int32(35)),
            ),
            child: Box::new(PlanNode::SeqScan {
                table_oid: users.oid,
                predicate: None,
            }),
        },
        &ctx,
    )?;
    db.commit(&ctx.txn)?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], Value::Int32(2));
    assert_eq!(rows[1][0], Value::Int32(3));

    Ok(())
}

#[test]
fn test_join_is_rewritten_and_executed() -> Result<()> {
    let (db, _dir) = create_db()?;
    setup_users_and_orders(&db)?;
    let users = db.catalog.table_by_name("users").unwrap();
    let orders = db.catalog.table_by_name("orders").unwrap();

    // orders join users on orders.user_id == users.id. With an index on
    // users.id the optimizer goes through the nested-index path; without
    // one it hash-joins. Both must agree on the result.
    let plan = || PlanNode::NestedLoopJoin {
        left: Box::new(PlanNode::SeqScan {
            table_oid: orders.oid,
            predicate: None,
        }),
        right: Box::new(PlanNode::SeqScan {
            table_oid: users.oid,
            predicate: None,
        }),
        predicate: Expression::equals(Expression::column(0), Expression::column(2)),
        join_type: JoinType::Inner,
    };

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let hash_result = db.execute(plan(), &ctx)?;
    db.commit(&ctx.txn)?;

    db.catalog
        .create_index("idx_users_id", "users", vec![0], 4, 16, 16)?;

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let index_result = db.execute(plan(), &ctx)?;
    db.commit(&ctx.txn)?;

    assert_eq!(hash_result.len(), 3);
    assert_eq!(index_result.len(), 3);
    for row in &index_result {
        assert_eq!(row.len(), 4);
        assert_eq!(row[0], row[2]);
        assert!(hash_result.contains(row));
    }

    Ok(())
}

#[test]
fn test_left_join_pads_missing_users() -> Result<()> {
    let (db, _dir) = create_db()?;
    setup_users_and_orders(&db)?;
    let users = db.catalog.table_by_name("users").unwrap();
    let orders = db.catalog.table_by_name("orders").unwrap();

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let rows = db.execute(
        PlanNode::NestedLoopJoin {
            left: Box::new(PlanNode::SeqScan {
                table_oid: orders.oid,
                predicate: None,
            }),
            right: Box::new(PlanNode::SeqScan {
                table_oid: users.oid,
                predicate: None,
            }),
            predicate: Expression::equals(Expression::column(0), Expression::column(2)),
            join_type: JoinType::Left,
        },
        &ctx,
    )?;
    db.commit(&ctx.txn)?;

    assert_eq!(rows.len(), 4);
    let orphan = rows
        .iter()
        .find(|r| r[0] == Value::Int32(9))
        .expect("order without user is padded");
    assert_eq!(orphan[2], Value::Null);
    assert_eq!(orphan[3], Value::Null);

    Ok(())
}

#[test]
fn test_aggregation_over_join_key() -> Result<()> {
    let (db, _dir) = create_db()?;
    setup_users_and_orders(&db)?;
    let orders = db.catalog.table_by_name("orders").unwrap();

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let rows = db.execute(
        PlanNode::Aggregate {
            child: Box::new(PlanNode::SeqScan {
                table_oid: orders.oid,
                predicate: None,
            }),
            group_bys: vec![Expression::column(0)],
            aggregates: vec![
                (AggregateFunction::CountStar, Expression::column(1)),
                (AggregateFunction::Sum, Expression::column(1)),
            ],
        },
        &ctx,
    )?;
    db.commit(&ctx.txn)?;

    assert_eq!(rows.len(), 3);
    let user1 = rows.iter().find(|r| r[0] == Value::Int32(1)).unwrap();
    assert_eq!(user1[1], Value::Int32(2));
    assert_eq!(user1[2], Value::Int32(250));

    Ok(())
}

#[test]
fn test_sort_limit_runs_as_top_n() -> Result<()> {
    let (db, _dir) = create_db()?;
    setup_users_and_orders(&db)?;
    let orders = db.catalog.table_by_name("orders").unwrap();

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let rows = db.execute(
        PlanNode::Limit {
            child: Box::new(PlanNode::Sort {
                child: Box::new(PlanNode::SeqScan {
                    table_oid: orders.oid,
                    predicate: None,
                }),
                order_bys: vec![(Expression::column(1), SortOrder::Descending)],
            }),
            limit: 2,
        },
        &ctx,
    )?;
    db.commit(&ctx.txn)?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], Value::Int32(999));
    assert_eq!(rows[1][1], Value::Int32(200));

    Ok(())
}

#[test]
fn test_delete_then_rescan() -> Result<()> {
    let (db, _dir) = create_db()?;
    setup_users_and_orders(&db)?;
    let orders = db.catalog.table_by_name("orders").unwrap();

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let deleted = db.execute(
        PlanNode::Delete {
            table_oid: orders.oid,
            child: Box::new(PlanNode::SeqScan {
                table_oid: orders.oid,
                predicate: Some(Expression::equals(
                    Expression::column(0),
                    Expression::literal(Value::Int32(1)),
                )),
            }),
        },
        &ctx,
    )?;
    assert_eq!(deleted, vec![vec![Value::Int32(2)]]);
    db.commit(&ctx.txn)?;

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let rows = db.execute(
        PlanNode::SeqScan {
            table_oid: orders.oid,
            predicate: None,
        },
        &ctx,
    )?;
    db.commit(&ctx.txn)?;
    assert_eq!(rows.len(), 2);

    Ok(())
}

#[test]
fn test_abort_rolls_back_inserts_and_index_entries() -> Result<()> {
    let (db, _dir) = create_db()?;
    db.catalog.create_table(
        "items",
        Schema::new(vec![Column::new("id", DataType::Int32)]),
    )?;
    let items = db.catalog.table_by_name("items").unwrap();
    let index = db.catalog.create_index("idx_items_id", "items", vec![0], 4, 16, 16)?;

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    db.execute(
        PlanNode::Insert {
            table_oid: items.oid,
            child: Box::new(PlanNode::Values {
                rows: int_rows(&[vec![1], vec![2]]),
            }),
        },
        &ctx,
    )?;
    db.abort(&ctx.txn)?;
    assert_eq!(ctx.txn.state(), TransactionState::Aborted);

    let ctx = db.begin(IsolationLevel::ReadCommitted);
    let rows = db.execute(
        PlanNode::SeqScan {
            table_oid: items.oid,
            predicate: None,
        },
        &ctx,
    )?;
    db.commit(&ctx.txn)?;
    assert!(rows.is_empty());
    assert!(index.btree.is_empty());

    Ok(())
}

#[test]
fn test_flush_then_reopen_preserves_data() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("test.db");

    let (first_page_id, index_name) = {
        let db = Database::create(&path, Options::default())?;
        let table = db.catalog.create_table(
            "items",
            Schema::new(vec![Column::new("id", DataType::Int32)]),
        )?;
        db.catalog
            .create_index("idx_items_id", "items", vec![0], 4, 16, 16)?;

        let ctx = db.begin(IsolationLevel::ReadCommitted);
        db.execute(
            PlanNode::Insert {
                table_oid: table.oid,
                child: Box::new(PlanNode::Values {
                    rows: int_rows(&[vec![10], vec![20], vec![30]]),
                }),
            },
            &ctx,
        )?;
        db.commit(&ctx.txn)?;
        db.flush()?;
        (table.heap.first_page_id(), "idx_items_id")
    };

    // The catalog itself is in-memory, so re-register the table over the
    // surviving pages and reopen the persisted index by name.
    let db = Database::open(&path, Options::default())?;
    let heap = shaledb::access::heap::TableHeap::open(db.buffer_pool.clone(), first_page_id);
    let rows: Vec<_> = heap.scan().collect::<Result<Vec<_>>>()?;
    assert_eq!(rows.len(), 3);

    let tree = shaledb::access::btree::BPlusTree::open(
        index_name,
        db.buffer_pool.clone(),
        4,
        16,
        16,
    )?;
    let key = shaledb::access::btree::key::encode_key(&[Value::Int32(20)], 4)?;
    assert!(tree.get(&key)?.is_some());

    Ok(())
}

#[test]
fn test_deadlock_between_two_executors_aborts_youngest() -> Result<()> {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    let (db, _dir) = create_db()?;
    let db = Arc::new(db);
    db.catalog.create_table(
        "a",
        Schema::new(vec![Column::new("id", DataType::Int32)]),
    )?;
    db.catalog.create_table(
        "b",
        Schema::new(vec![Column::new("id", DataType::Int32)]),
    )?;
    let a = db.catalog.table_by_name("a").unwrap().oid;
    let b = db.catalog.table_by_name("b").unwrap().oid;

    let older = db.begin(IsolationLevel::RepeatableRead);
    let younger = db.begin(IsolationLevel::RepeatableRead);
    assert!(older.txn.id() < younger.txn.id());

    assert!(db
        .lock_manager
        .lock_table(&older.txn, LockMode::Exclusive, a)
        .unwrap());
    assert!(db
        .lock_manager
        .lock_table(&younger.txn, LockMode::Exclusive, b)
        .unwrap());

    let older_wait = {
        let db = Arc::clone(&db);
        let txn = Arc::clone(&older.txn);
        thread::spawn(move || db.lock_manager.lock_table(&txn, LockMode::Exclusive, b))
    };
    thread::sleep(Duration::from_millis(50));
    let younger_result = db
        .lock_manager
        .lock_table(&younger.txn, LockMode::Exclusive, a);

    // The detector picks the younger transaction; its blocking call
    // returns without a grant and the caller rolls it back.
    assert_eq!(younger_result, Ok(false));
    assert!(younger.txn.is_aborted());
    db.abort(&younger.txn)?;

    assert_eq!(older_wait.join().unwrap(), Ok(true));
    db.commit(&older.txn)?;

    Ok(())
}

#[test]
fn test_repeatable_read_scan_blocks_writer() -> Result<()> {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    let (db, _dir) = create_db()?;
    let db = Arc::new(db);
    setup_users_and_orders(&db)?;
    let users = db.catalog.table_by_name("users").unwrap();

    // A repeatable-read scan holds S row locks until commit.
    let reader = db.begin(IsolationLevel::RepeatableRead);
    let rows = db.execute(
        PlanNode::SeqScan {
            table_oid: users.oid,
            predicate: None,
        },
        &reader,
    )?;
    assert_eq!(rows.len(), 3);

    let writer = db.begin(IsolationLevel::ReadCommitted);
    let writer_handle = {
        let db = Arc::clone(&db);
        let writer_ctx = writer.clone();
        let oid = users.oid;
        thread::spawn(move || {
            db.execute(
                PlanNode::Delete {
                    table_oid: oid,
                    child: Box::new(PlanNode::SeqScan {
                        table_oid: oid,
                        predicate: None,
                    }),
                },
                &writer_ctx,
            )
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!writer_handle.is_finished());

    db.commit(&reader.txn)?;
    let deleted = writer_handle.join().unwrap()?;
    assert_eq!(deleted, vec![vec![Value::Int32(3)]]);
    db.commit(&writer.txn)?;

    Ok(())
}

#[test]
fn test_read_uncommitted_shared_lock_is_refused() -> Result<()> {
    let (db, _dir) = create_db()?;
    setup_users_and_orders(&db)?;
    let users = db.catalog.table_by_name("users").unwrap();

    let ctx = db.begin(IsolationLevel::ReadUncommitted);
    let result = db
        .lock_manager
        .lock_table(&ctx.txn, LockMode::Shared, users.oid);
    assert_eq!(
        result,
        Err(TransactionAbort {
            txn_id: ctx.txn.id(),
            reason: AbortReason::LockSharedOnReadUncommitted,
        })
    );

    Ok(())
}
