use bytes::Bytes;
use opaldb::connection::Session;
use opaldb::core::database::SingleDb;
use opaldb::core::protocol::RespFrame;
use opaldb::core::tasks::TimeWheel;
use opaldb::core::cmd_line;
use std::sync::Arc;
use std::time::Duration;

fn fresh_db() -> Arc<SingleDb> {
    let wheel = Arc::new(TimeWheel::start(Duration::from_millis(50), 64));
    SingleDb::new(0, wheel)
}

async fn run(db: &SingleDb, session: &mut Session, parts: &[&str]) -> RespFrame {
    db.execute(session, cmd_line(parts)).await
}

fn bulk(s: &'static str) -> RespFrame {
    RespFrame::BulkString(Bytes::from_static(s.as_bytes()))
}

#[tokio::test]
async fn test_multi_queues_and_exec_runs_in_order() {
    let db = fresh_db();
    let mut session = Session::fake();
    assert_eq!(run(&db, &mut session, &["MULTI"]).await, RespFrame::ok());
    assert_eq!(
        run(&db, &mut session, &["SET", "x", "1"]).await,
        RespFrame::queued()
    );
    assert_eq!(
        run(&db, &mut session, &["INCR", "x"]).await,
        RespFrame::queued()
    );
    assert_eq!(
        run(&db, &mut session, &["EXEC"]).await,
        RespFrame::Array(vec![RespFrame::ok(), RespFrame::Integer(2)])
    );
    assert_eq!(run(&db, &mut session, &["GET", "x"]).await, bulk("2"));
    assert!(!session.multi);
}

#[tokio::test]
async fn test_nested_multi_is_rejected() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["MULTI"]).await;
    let reply = run(&db, &mut session, &["MULTI"]).await;
    assert!(matches!(reply, RespFrame::Error(m) if m.contains("nested")));
}

#[tokio::test]
async fn test_discard_clears_the_queue() {
    let db = fresh_db();
    let mut session = Session::fake();
    let reply = run(&db, &mut session, &["DISCARD"]).await;
    assert!(matches!(reply, RespFrame::Error(m) if m.contains("DISCARD without MULTI")));

    run(&db, &mut session, &["MULTI"]).await;
    run(&db, &mut session, &["SET", "x", "1"]).await;
    assert_eq!(run(&db, &mut session, &["DISCARD"]).await, RespFrame::ok());
    assert_eq!(
        run(&db, &mut session, &["EXISTS", "x"]).await,
        RespFrame::Integer(0)
    );
}

#[tokio::test]
async fn test_exec_without_multi_errors() {
    let db = fresh_db();
    let mut session = Session::fake();
    let reply = run(&db, &mut session, &["EXEC"]).await;
    assert!(matches!(reply, RespFrame::Error(m) if m.contains("EXEC without MULTI")));
}

#[tokio::test]
async fn test_queueing_error_aborts_exec() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["MULTI"]).await;
    let reply = run(&db, &mut session, &["NOSUCHCMD", "a"]).await;
    assert!(reply.is_error());
    // The connection stays in MULTI and later commands still queue.
    assert_eq!(
        run(&db, &mut session, &["SET", "x", "1"]).await,
        RespFrame::queued()
    );
    let reply = run(&db, &mut session, &["EXEC"]).await;
    assert!(matches!(reply, RespFrame::Error(m) if m.starts_with("EXECABORT")));
    assert_eq!(
        run(&db, &mut session, &["EXISTS", "x"]).await,
        RespFrame::Integer(0)
    );
}

#[tokio::test]
async fn test_watch_conflict_returns_empty_array() {
    let db = fresh_db();
    let mut session = Session::fake();
    let mut other = Session::fake();

    run(&db, &mut session, &["SET", "k", "v"]).await;
    assert_eq!(run(&db, &mut session, &["WATCH", "k"]).await, RespFrame::ok());
    run(&db, &mut session, &["MULTI"]).await;
    run(&db, &mut session, &["SET", "k", "mine"]).await;

    // Another client slips in before EXEC.
    run(&db, &mut other, &["SET", "k", "w"]).await;

    assert_eq!(
        run(&db, &mut session, &["EXEC"]).await,
        RespFrame::empty_array()
    );
    assert_eq!(
        run(&db, &mut session, &["GET", "k"]).await,
        RespFrame::BulkString(Bytes::from_static(b"w"))
    );
}

#[tokio::test]
async fn test_watch_without_conflict_commits() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["SET", "k", "v"]).await;
    run(&db, &mut session, &["WATCH", "k"]).await;
    run(&db, &mut session, &["MULTI"]).await;
    run(&db, &mut session, &["SET", "k", "mine"]).await;
    assert_eq!(
        run(&db, &mut session, &["EXEC"]).await,
        RespFrame::Array(vec![RespFrame::ok()])
    );
}

#[tokio::test]
async fn test_watch_inside_multi_is_rejected() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["MULTI"]).await;
    let reply = run(&db, &mut session, &["WATCH", "k"]).await;
    assert!(matches!(reply, RespFrame::Error(m) if m.contains("WATCH inside MULTI")));
}

#[tokio::test]
async fn test_mid_exec_failure_rolls_back() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["SET", "target", "original"]).await;
    run(&db, &mut session, &["SET", "notanumber", "abc"]).await;

    run(&db, &mut session, &["MULTI"]).await;
    run(&db, &mut session, &["SET", "target", "dirty"]).await;
    run(&db, &mut session, &["INCR", "notanumber"]).await;
    let reply = run(&db, &mut session, &["EXEC"]).await;
    assert!(matches!(reply, RespFrame::Error(m) if m.starts_with("EXECABORT")));

    // The first command's effect was undone by the rollback replay.
    assert_eq!(
        run(&db, &mut session, &["GET", "target"]).await,
        RespFrame::BulkString(Bytes::from_static(b"original"))
    );
}

#[tokio::test]
async fn test_rollback_restores_ttl_state() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["SET", "k", "v"]).await;
    run(&db, &mut session, &["EXPIRE", "k", "100"]).await;
    run(&db, &mut session, &["SET", "bad", "abc"]).await;

    run(&db, &mut session, &["MULTI"]).await;
    run(&db, &mut session, &["SET", "k", "dirty"]).await;
    run(&db, &mut session, &["INCR", "bad"]).await;
    run(&db, &mut session, &["EXEC"]).await;

    match run(&db, &mut session, &["TTL", "k"]).await {
        RespFrame::Integer(left) => assert!((90..=100).contains(&left)),
        other => panic!("expected restored ttl, got {other:?}"),
    }
}

#[tokio::test]
async fn test_no_partial_effects_visible_after_commit() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["MULTI"]).await;
    run(&db, &mut session, &["SET", "a", "1"]).await;
    run(&db, &mut session, &["SET", "b", "2"]).await;
    run(&db, &mut session, &["EXEC"]).await;
    assert_eq!(
        run(&db, &mut session, &["MGET", "a", "b"]).await,
        RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"1")),
            RespFrame::BulkString(Bytes::from_static(b"2")),
        ])
    );
}
