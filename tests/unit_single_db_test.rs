use bytes::Bytes;
use opaldb::connection::Session;
use opaldb::core::database::SingleDb;
use opaldb::core::protocol::RespFrame;
use opaldb::core::tasks::TimeWheel;
use opaldb::core::{CmdLine, cmd_line};
use std::sync::Arc;
use std::time::Duration;

fn fresh_db() -> Arc<SingleDb> {
    let wheel = Arc::new(TimeWheel::start(Duration::from_millis(50), 64));
    SingleDb::new(0, wheel)
}

async fn run(db: &SingleDb, session: &mut Session, parts: &[&str]) -> RespFrame {
    db.execute(session, cmd_line(parts)).await
}

#[tokio::test]
async fn test_set_incr_get_scenario() {
    let db = fresh_db();
    let mut session = Session::fake();
    assert_eq!(run(&db, &mut session, &["SET", "a", "1"]).await, RespFrame::ok());
    assert_eq!(
        run(&db, &mut session, &["INCR", "a"]).await,
        RespFrame::Integer(2)
    );
    assert_eq!(
        run(&db, &mut session, &["GET", "a"]).await,
        RespFrame::BulkString(Bytes::from_static(b"2"))
    );
}

#[tokio::test]
async fn test_unknown_command_and_arity_errors() {
    let db = fresh_db();
    let mut session = Session::fake();
    let reply = run(&db, &mut session, &["NOSUCHCMD", "x"]).await;
    match reply {
        RespFrame::Error(message) => assert!(message.contains("unknown command")),
        other => panic!("expected error, got {other:?}"),
    }
    let reply = run(&db, &mut session, &["GET"]).await;
    match reply {
        RespFrame::Error(message) => assert!(message.contains("wrong argument count")),
        other => panic!("expected arity error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_wrong_type_is_reported() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["RPUSH", "l", "x"]).await;
    let reply = run(&db, &mut session, &["INCR", "l"]).await;
    match reply {
        RespFrame::Error(message) => assert!(message.starts_with("WRONGTYPE")),
        other => panic!("expected WRONGTYPE, got {other:?}"),
    }
}

#[tokio::test]
async fn test_versions_increase_on_every_write() {
    let db = fresh_db();
    let mut session = Session::fake();
    let key: Bytes = Bytes::from_static(b"counter");
    assert_eq!(db.version_of(&key), 0);
    let mut previous = 0;
    for i in 0..5 {
        run(&db, &mut session, &["SET", "counter", &i.to_string()]).await;
        let current = db.version_of(&key);
        assert!(current > previous, "version must strictly increase");
        previous = current;
    }
}

#[tokio::test]
async fn test_reads_never_observe_an_elapsed_ttl() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["SET", "ephemeral", "v"]).await;
    run(&db, &mut session, &["PEXPIRE", "ephemeral", "30"]).await;
    assert_eq!(
        run(&db, &mut session, &["GET", "ephemeral"]).await,
        RespFrame::BulkString(Bytes::from_static(b"v"))
    );
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(
        run(&db, &mut session, &["GET", "ephemeral"]).await,
        RespFrame::Null
    );
    // The lazy check removed both the data and the ttl entries.
    assert_eq!(db.data_len(), 0);
    assert_eq!(db.ttl_len(), 0);
}

#[tokio::test]
async fn test_expiry_job_removes_key_in_background() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["SET", "soon", "v"]).await;
    run(&db, &mut session, &["PEXPIRE", "soon", "20"]).await;
    // No further access: the scheduled job alone must clean up.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(db.data_len(), 0);
    assert_eq!(db.ttl_len(), 0);
}

#[tokio::test]
async fn test_delete_cancels_expiry_state() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["SET", "k", "v"]).await;
    run(&db, &mut session, &["EXPIRE", "k", "100"]).await;
    assert_eq!(
        run(&db, &mut session, &["DEL", "k"]).await,
        RespFrame::Integer(1)
    );
    assert_eq!(db.ttl_len(), 0);
    // Re-created key must not inherit the old TTL.
    run(&db, &mut session, &["SET", "k", "w"]).await;
    assert_eq!(
        run(&db, &mut session, &["TTL", "k"]).await,
        RespFrame::Integer(-1)
    );
}

#[tokio::test]
async fn test_ttl_and_persist() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["SET", "k", "v"]).await;
    run(&db, &mut session, &["EXPIRE", "k", "100"]).await;
    match run(&db, &mut session, &["TTL", "k"]).await {
        RespFrame::Integer(left) => assert!((90..=100).contains(&left)),
        other => panic!("expected integer ttl, got {other:?}"),
    }
    assert_eq!(
        run(&db, &mut session, &["PERSIST", "k"]).await,
        RespFrame::Integer(1)
    );
    assert_eq!(
        run(&db, &mut session, &["TTL", "k"]).await,
        RespFrame::Integer(-1)
    );
}

#[tokio::test]
async fn test_list_hash_set_zset_basics() {
    let db = fresh_db();
    let mut session = Session::fake();

    assert_eq!(
        run(&db, &mut session, &["RPUSH", "l", "a", "b", "c"]).await,
        RespFrame::Integer(3)
    );
    assert_eq!(
        run(&db, &mut session, &["LRANGE", "l", "0", "-1"]).await,
        RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"a")),
            RespFrame::BulkString(Bytes::from_static(b"b")),
            RespFrame::BulkString(Bytes::from_static(b"c")),
        ])
    );

    assert_eq!(
        run(&db, &mut session, &["HSET", "h", "f", "1", "g", "2"]).await,
        RespFrame::Integer(2)
    );
    assert_eq!(
        run(&db, &mut session, &["HGET", "h", "g"]).await,
        RespFrame::BulkString(Bytes::from_static(b"2"))
    );

    assert_eq!(
        run(&db, &mut session, &["SADD", "s", "x", "y", "x"]).await,
        RespFrame::Integer(2)
    );
    assert_eq!(
        run(&db, &mut session, &["SCARD", "s"]).await,
        RespFrame::Integer(2)
    );

    assert_eq!(
        run(&db, &mut session, &["ZADD", "z", "2", "b", "1", "a"]).await,
        RespFrame::Integer(2)
    );
    assert_eq!(
        run(&db, &mut session, &["ZRANGE", "z", "0", "-1"]).await,
        RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"a")),
            RespFrame::BulkString(Bytes::from_static(b"b")),
        ])
    );
}

#[tokio::test]
async fn test_popped_empty_containers_disappear() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["RPUSH", "l", "only"]).await;
    assert_eq!(
        run(&db, &mut session, &["RPOP", "l"]).await,
        RespFrame::BulkString(Bytes::from_static(b"only"))
    );
    assert_eq!(
        run(&db, &mut session, &["EXISTS", "l"]).await,
        RespFrame::Integer(0)
    );
}

#[tokio::test]
async fn test_undo_logs_restore_prior_state() {
    let db = fresh_db();
    let mut session = Session::fake();
    run(&db, &mut session, &["SET", "k", "before"]).await;
    let line: CmdLine = cmd_line(&["SET", "k", "after"]);
    let undo = db.undo_logs(&line);
    run(&db, &mut session, &["SET", "k", "after"]).await;
    for undo_line in &undo {
        db.execute_with_lock(undo_line).await;
    }
    assert_eq!(
        run(&db, &mut session, &["GET", "k"]).await,
        RespFrame::BulkString(Bytes::from_static(b"before"))
    );
}
