use bytes::{Buf, Bytes, BytesMut};
use opaldb::config::Config;
use opaldb::connection::Session;
use opaldb::core::DataEngine;
use opaldb::core::database::{MultiDb, Role};
use opaldb::core::persistence::snapshot;
use opaldb::core::protocol::{RespFrame, decode_one};
use opaldb::core::cmd_line;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

fn bulk(s: &'static str) -> RespFrame {
    RespFrame::BulkString(Bytes::from_static(s.as_bytes()))
}

async fn read_frame(sock: &mut TcpStream, buf: &mut BytesMut) -> RespFrame {
    loop {
        if let Some((frame, len)) = decode_one(&buf[..]).unwrap() {
            buf.advance(len);
            return frame;
        }
        let n = sock.read_buf(buf).await.unwrap();
        assert!(n > 0, "peer closed mid-handshake");
    }
}

fn command_name(frame: &RespFrame) -> String {
    let line = frame.as_cmd_line().expect("command array");
    String::from_utf8_lossy(&line[0]).to_lowercase()
}

// --- Master side, exercised without a socket ---

#[tokio::test]
async fn test_master_psync_ships_snapshot_then_stream() {
    let master = MultiDb::new_standalone(Arc::new(Config::default()))
        .await
        .unwrap();
    let mut client = Session::fake();
    master
        .execute(&mut client, cmd_line(&["SET", "seed", "1"]))
        .await;

    let (tx, mut replica_inbox) = mpsc::unbounded_channel();
    let mut link = Session::new(tx);
    assert!(
        master
            .execute(&mut link, cmd_line(&["PSYNC", "?", "-1"]))
            .await
            .is_none()
    );

    // FULLRESYNC <replid> <offset>
    let header = replica_inbox.recv().await.unwrap();
    let RespFrame::SimpleString(header) = header else {
        panic!("expected status header, got {header:?}");
    };
    let tokens: Vec<&str> = header.split(' ').collect();
    assert_eq!(tokens[0], "FULLRESYNC");
    assert_eq!(tokens[1].len(), 40);

    // The snapshot body decodes into the seeded state.
    let RespFrame::BulkString(body) = replica_inbox.recv().await.unwrap() else {
        panic!("expected snapshot bulk string");
    };
    let scratch = MultiDb::new_basic(Arc::new(Config::default()));
    snapshot::load_from_bytes(&body, &scratch).unwrap();
    let mut probe = Session::fake();
    assert_eq!(
        scratch
            .execute(&mut probe, cmd_line(&["GET", "seed"]))
            .await,
        Some(bulk("1"))
    );
    scratch.abort_timers();

    // Subsequent writes stream to the attached link in order.
    master
        .execute(&mut client, cmd_line(&["SET", "streamed", "2"]))
        .await;
    let streamed = tokio::time::timeout(Duration::from_secs(2), replica_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(command_name(&streamed), "set");
    assert!(master.replicas().offset() > 0);
    master.close().await;
}

#[tokio::test]
async fn test_replconf_replies() {
    let master = MultiDb::new_standalone(Arc::new(Config::default()))
        .await
        .unwrap();
    let mut session = Session::fake();
    assert_eq!(
        master
            .execute(&mut session, cmd_line(&["REPLCONF", "listening-port", "7001"]))
            .await,
        Some(RespFrame::ok())
    );
    assert_eq!(
        master
            .execute(&mut session, cmd_line(&["REPLCONF", "capa", "psync2"]))
            .await,
        Some(RespFrame::ok())
    );
    // ACK takes no reply at all.
    assert_eq!(
        master
            .execute(&mut session, cmd_line(&["REPLCONF", "ACK", "123"]))
            .await,
        None
    );
    master.close().await;
}

// --- Replica side, against a scripted master ---

#[tokio::test]
async fn test_replica_full_sync_and_stream_apply() {
    // Snapshot payload the scripted master will serve.
    let seed = MultiDb::new_basic(Arc::new(Config::default()));
    let mut session = Session::fake();
    seed.execute(&mut session, cmd_line(&["SET", "from-snapshot", "a"]))
        .await;
    let snapshot_bytes = snapshot::save_to_bytes(&seed).unwrap();
    seed.abort_timers();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let master_script = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::new();

        let ping = read_frame(&mut sock, &mut buf).await;
        assert_eq!(command_name(&ping), "ping");
        sock.write_all(b"+PONG\r\n").await.unwrap();

        let port_conf = read_frame(&mut sock, &mut buf).await;
        assert_eq!(command_name(&port_conf), "replconf");
        sock.write_all(b"+OK\r\n").await.unwrap();

        let capa_conf = read_frame(&mut sock, &mut buf).await;
        assert_eq!(command_name(&capa_conf), "replconf");
        sock.write_all(b"+OK\r\n").await.unwrap();

        let psync = read_frame(&mut sock, &mut buf).await;
        assert_eq!(command_name(&psync), "psync");
        let header = format!("FULLRESYNC {} 0", "f".repeat(40));
        sock.write_all(&RespFrame::SimpleString(header).encode_to_vec())
            .await
            .unwrap();
        sock.write_all(&RespFrame::BulkString(snapshot_bytes).encode_to_vec())
            .await
            .unwrap();

        // Continuous stream: one applied write.
        sock.write_all(&RespFrame::from_cmd_line(&cmd_line(&["SET", "from-stream", "b"])).encode_to_vec())
            .await
            .unwrap();

        // Keep the link open long enough for the replica to apply it.
        tokio::time::sleep(Duration::from_secs(3)).await;
    });

    let replica = MultiDb::new_standalone(Arc::new(Config::default()))
        .await
        .unwrap();
    let mut admin = Session::fake();
    assert_eq!(
        replica
            .execute(&mut admin, cmd_line(&["SLAVEOF", "127.0.0.1", &port.to_string()]))
            .await,
        Some(RespFrame::ok())
    );
    assert_eq!(replica.role(), Role::Replica);

    // Wait for the snapshot install and the streamed command to land.
    let mut applied = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut probe = Session::fake();
        let snapshot_key = replica
            .execute(&mut probe, cmd_line(&["GET", "from-snapshot"]))
            .await;
        let streamed_key = replica
            .execute(&mut probe, cmd_line(&["GET", "from-stream"]))
            .await;
        if snapshot_key == Some(bulk("a")) && streamed_key == Some(bulk("b")) {
            applied = true;
            break;
        }
    }
    assert!(applied, "replica never caught up with the master stream");

    // The offset advanced by the byte length of the applied payload.
    assert!(replica.replication().offset().await > 0);

    // Normal clients cannot write through a replica.
    let mut outsider = Session::fake();
    let reply = replica
        .execute(&mut outsider, cmd_line(&["SET", "x", "1"]))
        .await
        .unwrap();
    assert!(matches!(reply, RespFrame::Error(ref m) if m.starts_with("READONLY")));

    // SLAVEOF NO ONE tears the session down and restores the master role.
    assert_eq!(
        replica
            .execute(&mut admin, cmd_line(&["SLAVEOF", "NO", "ONE"]))
            .await,
        Some(RespFrame::ok())
    );
    assert_eq!(replica.role(), Role::Master);

    replica.close().await;
    master_script.abort();
}
