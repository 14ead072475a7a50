use bytes::Bytes;
use opaldb::config::Config;
use opaldb::connection::Session;
use opaldb::core::DataEngine;
use opaldb::core::database::MultiDb;
use opaldb::core::protocol::RespFrame;
use opaldb::core::cmd_line;
use std::sync::Arc;
use tokio::sync::mpsc;

fn bulk(s: &'static str) -> RespFrame {
    RespFrame::BulkString(Bytes::from_static(s.as_bytes()))
}

async fn fresh_engine() -> Arc<MultiDb> {
    MultiDb::new_standalone(Arc::new(Config::default()))
        .await
        .unwrap()
}

fn session_with_outbox() -> (Session, mpsc::UnboundedReceiver<RespFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Session::new(tx), rx)
}

#[tokio::test]
async fn test_subscribe_publish_delivers_message() {
    let engine = fresh_engine().await;
    let (mut subscriber, mut inbox) = session_with_outbox();
    let mut publisher = Session::fake();

    assert!(
        engine
            .execute(&mut subscriber, cmd_line(&["SUBSCRIBE", "ch"]))
            .await
            .is_none()
    );
    // Subscription confirmation arrives on the subscriber's own outbox.
    assert_eq!(
        inbox.recv().await.unwrap(),
        RespFrame::Array(vec![bulk("subscribe"), bulk("ch"), RespFrame::Integer(1)])
    );

    assert_eq!(
        engine
            .execute(&mut publisher, cmd_line(&["PUBLISH", "ch", "hi"]))
            .await,
        Some(RespFrame::Integer(1))
    );
    let message = inbox.recv().await.unwrap();
    assert_eq!(
        message,
        RespFrame::Array(vec![bulk("message"), bulk("ch"), bulk("hi")])
    );
    assert_eq!(
        message.encode_to_vec(),
        b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$2\r\nhi\r\n"
    );
    engine.close().await;
}

#[tokio::test]
async fn test_publish_without_subscribers() {
    let engine = fresh_engine().await;
    let mut publisher = Session::fake();
    assert_eq!(
        engine
            .execute(&mut publisher, cmd_line(&["PUBLISH", "nobody", "hi"]))
            .await,
        Some(RespFrame::Integer(0))
    );
    engine.close().await;
}

#[tokio::test]
async fn test_subscribe_is_idempotent() {
    let engine = fresh_engine().await;
    let (mut subscriber, mut inbox) = session_with_outbox();
    let mut publisher = Session::fake();

    engine
        .execute(&mut subscriber, cmd_line(&["SUBSCRIBE", "ch"]))
        .await;
    engine
        .execute(&mut subscriber, cmd_line(&["SUBSCRIBE", "ch"]))
        .await;
    let _confirm = inbox.recv().await.unwrap();

    // A single delivery despite the duplicate subscribe.
    assert_eq!(
        engine
            .execute(&mut publisher, cmd_line(&["PUBLISH", "ch", "one"]))
            .await,
        Some(RespFrame::Integer(1))
    );
    let message = inbox.recv().await.unwrap();
    assert_eq!(
        message,
        RespFrame::Array(vec![bulk("message"), bulk("ch"), bulk("one")])
    );
    assert!(inbox.try_recv().is_err(), "no duplicate delivery expected");
    engine.close().await;
}

#[tokio::test]
async fn test_unsubscribe_restores_prior_state() {
    let engine = fresh_engine().await;
    let (mut subscriber, mut inbox) = session_with_outbox();
    let mut publisher = Session::fake();

    engine
        .execute(&mut subscriber, cmd_line(&["SUBSCRIBE", "ch"]))
        .await;
    let _confirm = inbox.recv().await.unwrap();
    assert_eq!(subscriber.channels.len(), 1);

    engine
        .execute(&mut subscriber, cmd_line(&["UNSUBSCRIBE", "ch"]))
        .await;
    let confirm = inbox.recv().await.unwrap();
    assert_eq!(
        confirm,
        RespFrame::Array(vec![bulk("unsubscribe"), bulk("ch"), RespFrame::Integer(0)])
    );
    assert!(subscriber.channels.is_empty());

    assert_eq!(
        engine
            .execute(&mut publisher, cmd_line(&["PUBLISH", "ch", "hi"]))
            .await,
        Some(RespFrame::Integer(0))
    );
    engine.close().await;
}

#[tokio::test]
async fn test_connection_close_unsubscribes_everywhere() {
    let engine = fresh_engine().await;
    let (mut subscriber, mut inbox) = session_with_outbox();
    let mut publisher = Session::fake();

    engine
        .execute(&mut subscriber, cmd_line(&["SUBSCRIBE", "a", "b"]))
        .await;
    let _ = inbox.recv().await.unwrap();
    let _ = inbox.recv().await.unwrap();

    engine.after_client_close(&mut subscriber).await;
    assert_eq!(
        engine
            .execute(&mut publisher, cmd_line(&["PUBLISH", "a", "hi"]))
            .await,
        Some(RespFrame::Integer(0))
    );
    assert_eq!(
        engine
            .execute(&mut publisher, cmd_line(&["PUBLISH", "b", "hi"]))
            .await,
        Some(RespFrame::Integer(0))
    );
    engine.close().await;
}

#[tokio::test]
async fn test_fanout_reaches_every_subscriber() {
    let engine = fresh_engine().await;
    let (mut first, mut first_inbox) = session_with_outbox();
    let (mut second, mut second_inbox) = session_with_outbox();
    let mut publisher = Session::fake();

    engine.execute(&mut first, cmd_line(&["SUBSCRIBE", "ch"])).await;
    engine.execute(&mut second, cmd_line(&["SUBSCRIBE", "ch"])).await;
    let _ = first_inbox.recv().await.unwrap();
    let _ = second_inbox.recv().await.unwrap();

    assert_eq!(
        engine
            .execute(&mut publisher, cmd_line(&["PUBLISH", "ch", "all"]))
            .await,
        Some(RespFrame::Integer(2))
    );
    assert_eq!(
        first_inbox.recv().await.unwrap(),
        RespFrame::Array(vec![bulk("message"), bulk("ch"), bulk("all")])
    );
    assert_eq!(
        second_inbox.recv().await.unwrap(),
        RespFrame::Array(vec![bulk("message"), bulk("ch"), bulk("all")])
    );
    engine.close().await;
}
