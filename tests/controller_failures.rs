mod common;

use common::{
    Player, assert_no_delivery, player_row, players_schema, players_writer, wait_for_delivery,
};
use livedb::{
    ColumnDef, ColumnType, Expr, FetchedRecordsController, FetchedRecordsEvent, IndexPath,
    LivedbError, QuerySource, SerialQueue, TableSchema, Value,
};
use std::sync::Arc;

struct Fixture {
    writer: livedb::DatabaseWriter,
    queue: SerialQueue,
    controller: Arc<FetchedRecordsController<Player>>,
    recorder: Arc<common::Recorder>,
    rx: std::sync::mpsc::Receiver<()>,
}

fn fixture(seed: &[(i64, &str, i64)]) -> Fixture {
    let writer = players_writer();
    let rows: Vec<_> = seed
        .iter()
        .map(|(id, name, score)| player_row(*id, name, *score))
        .collect();
    writer
        .write(move |db| {
            for row in rows {
                db.insert("players", row)?;
            }
            Ok(())
        })
        .expect("seed");

    let queue = SerialQueue::new("consumer");
    let controller = Arc::new(FetchedRecordsController::by_primary_key(
        writer.clone(),
        QuerySource::sql("SELECT * FROM players ORDER BY id", vec![]),
        queue.clone(),
    ));
    let (recorder, rx) = common::Recorder::new();
    common::attach(&queue, &controller, &recorder);

    Fixture {
        writer,
        queue,
        controller,
        recorder,
        rx,
    }
}

#[test]
fn rolled_back_transactions_emit_nothing() {
    let f = fixture(&[(1, "a", 0)]);

    let err = f
        .writer
        .write(|db| {
            db.insert("players", player_row(2, "phantom", 0))?;
            Err::<(), _>(LivedbError::Validation("rolled back".into()))
        })
        .expect_err("rollback");
    assert!(matches!(err, LivedbError::Validation(_)));
    assert_no_delivery(&f.rx);

    // The next commit sees no trace of the rolled-back row.
    f.writer
        .write(|db| db.insert("players", player_row(3, "real", 0)))
        .expect("insert");
    wait_for_delivery(&f.rx);
    let scripts = f.recorder.drain_scripts();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].len(), 1);
    let (record, event) = &scripts[0][0];
    assert_eq!(record.id, 3);
    assert_eq!(
        event,
        &FetchedRecordsEvent::Insertion {
            index_path: IndexPath::new(0, 1)
        }
    );
}

#[test]
fn transactions_outside_the_observed_tables_are_ignored() {
    let f = fixture(&[(1, "a", 0)]);
    f.writer
        .write(|db| {
            db.create_table(TableSchema {
                table_name: "audit".into(),
                columns: vec![ColumnDef {
                    name: "id".into(),
                    col_type: ColumnType::Integer,
                    nullable: false,
                }],
                primary_key: vec!["id".into()],
            })
        })
        .expect("create audit");

    f.writer
        .write(|db| db.insert("audit", livedb::Row::from_pairs([("id", Value::Integer(1))])))
        .expect("insert audit");
    assert_no_delivery(&f.rx);

    // An observed-table commit afterwards delivers exactly one script.
    f.writer
        .write(|db| db.insert("players", player_row(2, "b", 0)))
        .expect("insert players");
    wait_for_delivery(&f.rx);
    assert_eq!(f.recorder.drain_scripts().len(), 1);
}

#[test]
fn failed_refetch_surfaces_and_later_transactions_recover() {
    let f = fixture(&[(1, "a", 0)]);
    assert!(!f.controller.last_fetch_errored());

    // Dropping the observed table makes the commit-time refetch fail; the
    // failure must not raise into the commit itself.
    f.writer
        .write(|db| db.drop_table("players"))
        .expect("drop commits fine");
    wait_for_delivery(&f.rx);
    let failures = f.recorder.drain_failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("players"), "failure names the table");
    assert!(f.controller.last_fetch_errored());

    // Recreating the table recovers: the next relevant commit diffs against
    // the last delivered snapshot.
    f.writer
        .write(|db| {
            db.create_table(players_schema())?;
            db.insert("players", player_row(1, "a", 0))?;
            db.insert("players", player_row(2, "b", 0))
        })
        .expect("recreate");
    wait_for_delivery(&f.rx);
    assert!(!f.controller.last_fetch_errored());

    let scripts = f.recorder.drain_scripts();
    assert_eq!(scripts.len(), 1);
    let events: Vec<_> = scripts[0].iter().map(|(_, e)| e.clone()).collect();
    assert_eq!(
        events,
        vec![FetchedRecordsEvent::Insertion {
            index_path: IndexPath::new(0, 1)
        }]
    );

    let c = Arc::clone(&f.controller);
    let records = f.queue.run(move || c.fetched_records()).expect("records");
    assert_eq!(records.len(), 2);
}

#[test]
fn dropped_controllers_cancel_pending_deliveries() {
    let f = fixture(&[(1, "a", 0)]);
    let Fixture {
        writer,
        queue,
        controller,
        recorder,
        rx,
    } = f;

    drop(controller);
    // The observer is still registered with the database, but its weak
    // controller reference is dead: commits must not reach the delegate.
    writer
        .write(|db| db.insert("players", player_row(2, "b", 0)))
        .expect("insert");
    assert_no_delivery(&rx);
    assert!(recorder.drain().is_empty());

    // The writer itself is unaffected.
    let count = writer
        .read(|db| {
            db.prepare("SELECT * FROM players")
                .and_then(|s| s.fetch(db))
                .map(|rows| rows.len())
        })
        .expect("read")
        .expect("fetch");
    assert_eq!(count, 2);
    drop(queue);
}

#[test]
fn configuration_errors_leave_the_controller_unattached() {
    let writer = players_writer();
    let queue = SerialQueue::new("consumer");

    // Malformed SQL.
    let controller = Arc::new(FetchedRecordsController::<Player>::by_primary_key(
        writer.clone(),
        QuerySource::sql("SELECT FROM WHERE", vec![]),
        queue.clone(),
    ));
    let (recorder, rx) = common::Recorder::new();
    let err = {
        let controller = Arc::clone(&controller);
        let recorder = Arc::clone(&recorder);
        queue.run(move || {
            controller.set_delegate(&recorder);
            controller.perform_fetch()
        })
    }
    .expect_err("malformed SQL");
    assert!(matches!(err, LivedbError::Configuration(_)));

    // Arguments not matching placeholders.
    let controller2 = Arc::new(FetchedRecordsController::<Player>::by_primary_key(
        writer.clone(),
        QuerySource::sql(
            "SELECT * FROM players WHERE score > ?",
            vec![Value::Integer(1), Value::Integer(2)],
        ),
        queue.clone(),
    ));
    let err = {
        let controller2 = Arc::clone(&controller2);
        queue.run(move || controller2.perform_fetch())
    }
    .expect_err("arity mismatch");
    assert!(matches!(err, LivedbError::Configuration(_)));

    // Neither controller attached: commits stay silent.
    writer
        .write(|db| db.insert("players", player_row(1, "a", 0)))
        .expect("insert");
    assert_no_delivery(&rx);

    let c = Arc::clone(&controller);
    assert!(queue.run(move || c.fetched_records()).is_none());
}

#[test]
fn delegates_are_held_weakly() {
    let f = fixture(&[(1, "a", 0)]);
    let Fixture {
        writer,
        queue,
        controller,
        recorder,
        rx,
    } = f;

    fn wait_for_snapshot<F>(
        queue: &SerialQueue,
        controller: &Arc<FetchedRecordsController<Player>>,
        check: F,
    ) where
        F: Fn(&[Player]) -> bool,
    {
        for _ in 0..250 {
            let c = Arc::clone(controller);
            let records = queue.run(move || c.fetched_records()).expect("records");
            if check(&records) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("snapshot never advanced");
    }

    drop(recorder);
    // Delivery still happens (the snapshot advances); the dead delegate is
    // simply skipped.
    writer
        .write(|db| db.insert("players", player_row(2, "b", 0)))
        .expect("insert");
    assert!(rx.recv_timeout(std::time::Duration::from_millis(300)).is_err());
    wait_for_snapshot(&queue, &controller, |records| records.len() == 2);

    // The pipeline keeps maintaining the projection without a delegate.
    writer
        .write(|db| {
            db.update_where(
                "players",
                &Expr::Eq("id".into(), Value::Integer(2)),
                &[("score".into(), Value::Integer(9))],
            )?;
            Ok(())
        })
        .expect("update");
    wait_for_snapshot(&queue, &controller, |records| {
        records.iter().any(|p| p.id == 2 && p.score == 9)
    });
}
