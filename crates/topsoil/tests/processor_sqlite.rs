mod common;

use common::{Food, food, open_with_tables};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use topsoil::prelude::*;
use topsoil::{StorageErrorKind, TaskErrorKind};

fn task_kind(err: &Error) -> Option<TaskErrorKind> {
    match err {
        Error::Task(e) => Some(e.kind),
        _ => None,
    }
}

fn with_processor(processor: Arc<dyn Processor>) -> DataBase {
    let db = DataBase::open(DataBaseConfig::memory(), processor).expect("open database");
    db.create_tables_for(&[Food::info()]).expect("create tables");
    db
}

#[test]
fn storage_thread_serves_many_callers() {
    let processor = ThreadProcessor::spawn().expect("spawn storage thread");
    let db = with_processor(Arc::new(processor));

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let db = db.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let item = db.create::<Food>().expect("create");
                    item.set_name(format!("item-{n}-{i}")).expect("name");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker finished");
    }

    assert_eq!(db.select::<Food>().count().expect("count"), 40);
    let owner = db
        .processor()
        .process_now_and_get(|| Ok(thread::current().name().map(str::to_string)))
        .expect("run on owner");
    assert_eq!(owner.as_deref(), Some("topsoil-storage"));
}

#[test]
fn panicking_tasks_are_reported_and_the_thread_survives() {
    let processor = ThreadProcessor::spawn().expect("spawn storage thread");
    let db = with_processor(Arc::new(processor));

    let err = db
        .processor()
        .process_now(Box::new(|| -> topsoil::Result<()> { panic!("boom") }))
        .unwrap_err();
    assert_eq!(task_kind(&err), Some(TaskErrorKind::Panicked));

    food(&db, "Apple", true, 52);
    assert_eq!(db.select::<Food>().count().expect("count"), 1);
}

#[test]
fn current_thread_processor_rejects_other_threads() {
    let db = open_with_tables();
    let apple = food(&db, "Apple", true, 52);

    let remote = db.clone();
    let result = thread::spawn(move || {
        let created = remote.create::<Food>().map(|_| ());
        let read = apple.name().map(|_| ());
        (created, read)
    })
    .join()
    .expect("thread finished");

    assert_eq!(task_kind(&result.0.unwrap_err()), Some(TaskErrorKind::WrongThread));
    assert_eq!(task_kind(&result.1.unwrap_err()), Some(TaskErrorKind::WrongThread));
    assert_eq!(db.select::<Food>().count().expect("count"), 1);
}

#[test]
fn event_loop_owner_pumps_foreign_work() {
    let processor = Arc::new(EventLoopProcessor::new());
    let db = with_processor(processor.clone());

    let remote = db.clone();
    let worker = thread::spawn(move || {
        for name in ["Apple", "Bacon", "Cake"] {
            let item = remote.create::<Food>().expect("create");
            item.set_name(name).expect("name");
        }
        remote.select::<Food>().count().expect("count")
    });

    let mut ran = 0;
    while !worker.is_finished() {
        ran += processor.wait_and_run(Duration::from_millis(10));
    }
    let counted = worker.join().expect("worker finished");

    assert_eq!(counted, 3);
    assert!(ran >= 7);
    assert_eq!(processor.run_pending(), 0);
}

#[test]
fn submitted_failures_reach_subscribers() {
    let db = open_with_tables();
    let failures = db.subscribe_failures();

    db.submit("DELETE FROM \"Food_table\"");
    assert!(failures.try_recv().is_err());

    db.submit("INSERT INTO nowhere VALUES (1)");
    let failure = failures.try_recv().expect("failure delivered");
    assert!(failure.message.contains("nowhere"));
}

#[test]
fn submitted_work_runs_on_the_storage_thread() {
    let processor = ThreadProcessor::spawn().expect("spawn storage thread");
    let db = with_processor(Arc::new(processor));
    let failures = db.subscribe_failures();

    db.submit(
        "INSERT INTO \"Food_table\" (\"name\", \"healthy\", \"calories\") \
         VALUES ('Fig', 1, 74)",
    );
    db.submit("INSERT INTO missing VALUES (1)");

    let failure = failures
        .recv_timeout(Duration::from_secs(5))
        .expect("failure delivered");
    assert!(failure.message.contains("missing"));
    let figs = db
        .select::<Food>()
        .where_(Food::NAME)
        .equal("Fig")
        .as_list()
        .expect("query");
    assert_eq!(figs.len(), 1);
    assert_eq!(figs[0].calories().expect("calories"), 74);
}

#[test]
fn close_invalidates_everything() {
    let db = open_with_tables();
    let apple = food(&db, "Apple", true, 52);
    assert_eq!(db.live_proxy_count().expect("count"), 1);

    db.close().expect("close");
    assert!(db.is_closed().expect("closed"));
    db.close().expect("closing twice is a no-op");

    match apple.name() {
        Err(Error::StaleReference(e)) => assert_eq!(e.reason, StaleReason::Closed),
        other => panic!("expected a stale proxy, got {other:?}"),
    }
    match db.create::<Food>() {
        Err(Error::Storage(e)) => assert_eq!(e.kind, StorageErrorKind::Closed),
        other => panic!("expected a closed store, got {other:?}"),
    }
    assert!(!db.execute("SELECT 1").is_success());
    assert_eq!(db.live_proxy_count().expect("count"), 0);
}

#[test]
fn dropping_the_database_closes_it() {
    let db = open_with_tables();
    let apple = food(&db, "Apple", true, 52);
    drop(db);

    match apple.calories() {
        Err(Error::StaleReference(e)) => assert_eq!(e.reason, StaleReason::Closed),
        other => panic!("expected a stale proxy, got {other:?}"),
    }
}
