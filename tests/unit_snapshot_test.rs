use bytes::Bytes;
use opaldb::config::Config;
use opaldb::connection::Session;
use opaldb::core::DataEngine;
use opaldb::core::database::MultiDb;
use opaldb::core::persistence::snapshot;
use opaldb::core::protocol::RespFrame;
use opaldb::core::cmd_line;
use std::sync::Arc;
use tempfile::TempDir;

async fn run(db: &MultiDb, session: &mut Session, parts: &[&str]) -> Option<RespFrame> {
    db.execute(session, cmd_line(parts)).await
}

fn bulk(s: &'static str) -> RespFrame {
    RespFrame::BulkString(Bytes::from_static(s.as_bytes()))
}

async fn populated_engine() -> Arc<MultiDb> {
    let engine = MultiDb::new_standalone(Arc::new(Config::default()))
        .await
        .unwrap();
    let mut session = Session::fake();
    run(&engine, &mut session, &["SET", "s", "text"]).await;
    run(&engine, &mut session, &["RPUSH", "l", "a", "b", "c"]).await;
    run(&engine, &mut session, &["HSET", "h", "f1", "v1", "f2", "v2"]).await;
    run(&engine, &mut session, &["SADD", "set", "m1", "m2"]).await;
    run(&engine, &mut session, &["ZADD", "z", "1.5", "a", "2.5", "b"]).await;
    run(&engine, &mut session, &["PEXPIREAT", "s", "95617584000000"]).await;
    run(&engine, &mut session, &["SELECT", "5"]).await;
    run(&engine, &mut session, &["SET", "elsewhere", "yes"]).await;
    engine
}

async fn assert_loaded_state(engine: &MultiDb) {
    let mut session = Session::fake();
    assert_eq!(run(engine, &mut session, &["GET", "s"]).await, Some(bulk("text")));
    assert_eq!(
        run(engine, &mut session, &["LRANGE", "l", "0", "-1"]).await,
        Some(RespFrame::Array(vec![bulk("a"), bulk("b"), bulk("c")]))
    );
    assert_eq!(
        run(engine, &mut session, &["HGET", "h", "f2"]).await,
        Some(bulk("v2"))
    );
    assert_eq!(
        run(engine, &mut session, &["SISMEMBER", "set", "m2"]).await,
        Some(RespFrame::Integer(1))
    );
    assert_eq!(
        run(engine, &mut session, &["ZSCORE", "z", "b"]).await,
        Some(bulk("2.5"))
    );
    // TTL millisecond precision survives the round trip.
    assert_eq!(
        run(engine, &mut session, &["PTTL", "s"]).await.map(|reply| {
            match reply {
                RespFrame::Integer(ms) => ms > 0,
                _ => false,
            }
        }),
        Some(true)
    );
    run(engine, &mut session, &["SELECT", "5"]).await;
    assert_eq!(
        run(engine, &mut session, &["GET", "elsewhere"]).await,
        Some(bulk("yes"))
    );
}

#[tokio::test]
async fn test_snapshot_bytes_roundtrip_all_value_kinds() {
    let source = populated_engine().await;
    let bytes = snapshot::save_to_bytes(&source).unwrap();
    source.close().await;

    let target = MultiDb::new_basic(Arc::new(Config::default()));
    snapshot::load_from_bytes(&bytes, &target).unwrap();
    assert_loaded_state(&target).await;
    target.abort_timers();
}

#[tokio::test]
async fn test_snapshot_file_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dump.opdb").to_string_lossy().to_string();

    let source = populated_engine().await;
    snapshot::save(&source, &path).await.unwrap();
    source.close().await;

    let mut config = Config::default();
    config.db_filename = path;
    let restarted = MultiDb::new_standalone(Arc::new(config)).await.unwrap();
    assert_loaded_state(&restarted).await;
    restarted.close().await;
}

#[tokio::test]
async fn test_corrupted_snapshot_is_rejected() {
    let source = populated_engine().await;
    let bytes = snapshot::save_to_bytes(&source).unwrap();
    source.close().await;

    let mut corrupted = bytes.to_vec();
    let middle = corrupted.len() / 2;
    corrupted[middle] ^= 0xFF;
    let target = MultiDb::new_basic(Arc::new(Config::default()));
    assert!(snapshot::load_from_bytes(&corrupted, &target).is_err());
    target.abort_timers();
}

#[tokio::test]
async fn test_expired_snapshot_keys_are_skipped() {
    let source = MultiDb::new_standalone(Arc::new(Config::default()))
        .await
        .unwrap();
    let mut session = Session::fake();
    run(&source, &mut session, &["SET", "dead", "v"]).await;
    // An expiration instant firmly in the past.
    run(&source, &mut session, &["PEXPIREAT", "dead", "1000"]).await;
    run(&source, &mut session, &["SET", "alive", "v"]).await;

    let bytes = snapshot::save_to_bytes(&source).unwrap();
    source.close().await;

    let target = MultiDb::new_basic(Arc::new(Config::default()));
    snapshot::load_from_bytes(&bytes, &target).unwrap();
    let mut session = Session::fake();
    assert_eq!(
        run(&target, &mut session, &["EXISTS", "dead"]).await,
        Some(RespFrame::Integer(0))
    );
    assert_eq!(
        run(&target, &mut session, &["EXISTS", "alive"]).await,
        Some(RespFrame::Integer(1))
    );
    target.abort_timers();
}
