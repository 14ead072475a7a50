use bytes::Bytes;
use opaldb::config::Config;
use opaldb::connection::Session;
use opaldb::core::DataEngine;
use opaldb::core::database::MultiDb;
use opaldb::core::protocol::RespFrame;
use opaldb::core::cmd_line;
use std::sync::Arc;
use tempfile::TempDir;

fn aof_config(dir: &TempDir) -> Arc<Config> {
    let mut config = Config::default();
    config.append_only = true;
    config.append_filename = dir
        .path()
        .join("appendonly.aof")
        .to_string_lossy()
        .to_string();
    Arc::new(config)
}

async fn run(db: &MultiDb, session: &mut Session, parts: &[&str]) -> Option<RespFrame> {
    db.execute(session, cmd_line(parts)).await
}

fn bulk(s: &'static str) -> RespFrame {
    RespFrame::BulkString(Bytes::from_static(s.as_bytes()))
}

async fn assert_restart_state(engine: &MultiDb) {
    let mut session = Session::fake();
    assert_eq!(run(engine, &mut session, &["GET", "a"]).await, Some(bulk("1")));
    match run(engine, &mut session, &["TTL", "a"]).await.unwrap() {
        RespFrame::Integer(left) => assert!(
            (80..=100).contains(&left),
            "remaining ttl should survive replay, got {left}"
        ),
        other => panic!("expected ttl integer, got {other:?}"),
    }
    assert_eq!(
        run(engine, &mut session, &["LRANGE", "l", "0", "-1"]).await,
        Some(RespFrame::Array(vec![bulk("x"), bulk("y")]))
    );
}

#[tokio::test]
async fn test_aof_replay_restores_state_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = aof_config(&dir);

    let engine = MultiDb::new_standalone(config.clone()).await.unwrap();
    let mut session = Session::fake();
    run(&engine, &mut session, &["SET", "a", "1"]).await;
    run(&engine, &mut session, &["EXPIRE", "a", "100"]).await;
    run(&engine, &mut session, &["RPUSH", "l", "x", "y"]).await;
    engine.close().await;

    let restarted = MultiDb::new_standalone(config).await.unwrap();
    assert_restart_state(&restarted).await;
    restarted.close().await;
}

#[tokio::test]
async fn test_aof_select_records_keep_databases_apart() {
    let dir = TempDir::new().unwrap();
    let config = aof_config(&dir);

    let engine = MultiDb::new_standalone(config.clone()).await.unwrap();
    let mut session = Session::fake();
    run(&engine, &mut session, &["SET", "k", "zero"]).await;
    run(&engine, &mut session, &["SELECT", "3"]).await;
    run(&engine, &mut session, &["SET", "k", "three"]).await;
    engine.close().await;

    let restarted = MultiDb::new_standalone(config).await.unwrap();
    let mut session = Session::fake();
    assert_eq!(run(&restarted, &mut session, &["GET", "k"]).await, Some(bulk("zero")));
    run(&restarted, &mut session, &["SELECT", "3"]).await;
    assert_eq!(
        run(&restarted, &mut session, &["GET", "k"]).await,
        Some(bulk("three"))
    );
    restarted.close().await;
}

#[tokio::test]
async fn test_rewrite_compacts_and_preserves_state() {
    let dir = TempDir::new().unwrap();
    let config = aof_config(&dir);

    let engine = MultiDb::new_standalone(config.clone()).await.unwrap();
    let mut session = Session::fake();
    // Overwrite the same key many times so the rewrite has fat to trim.
    for i in 0..200 {
        run(&engine, &mut session, &["SET", "hot", &i.to_string()]).await;
    }
    run(&engine, &mut session, &["SET", "a", "1"]).await;
    run(&engine, &mut session, &["EXPIRE", "a", "100"]).await;
    run(&engine, &mut session, &["RPUSH", "l", "x", "y"]).await;
    // Let the writer drain before measuring.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let before = tokio::fs::metadata(&config.append_filename).await.unwrap().len();

    assert_eq!(
        run(&engine, &mut session, &["REWRITEAOF"]).await,
        Some(RespFrame::ok())
    );
    let after = tokio::fs::metadata(&config.append_filename).await.unwrap().len();
    assert!(
        after < before,
        "rewrite should shrink the log ({after} >= {before})"
    );
    engine.close().await;

    let restarted = MultiDb::new_standalone(config).await.unwrap();
    assert_restart_state(&restarted).await;
    let mut session = Session::fake();
    assert_eq!(
        run(&restarted, &mut session, &["GET", "hot"]).await,
        Some(bulk("199"))
    );
    restarted.close().await;
}

#[tokio::test]
async fn test_writes_after_rewrite_are_preserved() {
    let dir = TempDir::new().unwrap();
    let config = aof_config(&dir);

    let engine = MultiDb::new_standalone(config.clone()).await.unwrap();
    let mut session = Session::fake();
    run(&engine, &mut session, &["SET", "before", "1"]).await;
    run(&engine, &mut session, &["REWRITEAOF"]).await;
    run(&engine, &mut session, &["SET", "after", "2"]).await;
    engine.close().await;

    let restarted = MultiDb::new_standalone(config).await.unwrap();
    let mut session = Session::fake();
    assert_eq!(
        run(&restarted, &mut session, &["GET", "before"]).await,
        Some(bulk("1"))
    );
    assert_eq!(
        run(&restarted, &mut session, &["GET", "after"]).await,
        Some(bulk("2"))
    );
    restarted.close().await;
}

#[tokio::test]
async fn test_exec_effects_reach_the_aof() {
    let dir = TempDir::new().unwrap();
    let config = aof_config(&dir);

    let engine = MultiDb::new_standalone(config.clone()).await.unwrap();
    let mut session = Session::fake();
    run(&engine, &mut session, &["MULTI"]).await;
    run(&engine, &mut session, &["SET", "x", "1"]).await;
    run(&engine, &mut session, &["INCR", "x"]).await;
    run(&engine, &mut session, &["EXEC"]).await;
    engine.close().await;

    let restarted = MultiDb::new_standalone(config).await.unwrap();
    let mut session = Session::fake();
    assert_eq!(run(&restarted, &mut session, &["GET", "x"]).await, Some(bulk("2")));
    restarted.close().await;
}
