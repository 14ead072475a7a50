// src/connection/handler.rs

//! The per-connection loop: a framed RESP read half feeding the dispatch
//! engine, and a single writer task draining the session's outbound channel
//! so socket writes stay serialized no matter which subsystem produced them.

use super::Session;
use crate::core::protocol::RespFrameCodec;
use crate::core::{DataEngine, RespFrame};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::FramedRead;
use tracing::debug;

pub async fn handle_connection(
    stream: TcpStream,
    engine: Arc<dyn DataEngine>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    let (read_half, mut write_half) = stream.into_split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RespFrame>();
    let writer = tokio::spawn(async move {
        // Runs until the session drops its sender, draining in-flight
        // replies before closing the socket.
        while let Some(frame) = out_rx.recv().await {
            if write_half.write_all(&frame.encode_to_vec()).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut session = Session::new(out_tx);
    let mut frames = FramedRead::new(read_half, RespFrameCodec);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            frame = frames.next() => match frame {
                None => break,
                Some(Err(e)) => {
                    // Malformed framing is fatal for a stream context.
                    session.write_frame(RespFrame::Error(e.to_resp_string()));
                    break;
                }
                Some(Ok(frame)) => {
                    let Some(line) = frame.as_cmd_line() else {
                        session.write_frame(RespFrame::Error(
                            "ERR unsupported request type".into(),
                        ));
                        continue;
                    };
                    // A bare CRLF inline line parses to an empty array.
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(reply) = engine.execute(&mut session, line).await {
                        session.write_frame(reply);
                    }
                }
            }
        }
    }

    debug!("connection from {peer} closed");
    engine.after_client_close(&mut session).await;
    drop(session);
    let _ = writer.await;
}
