// src/core/pubsub/hub.rs

//! The publish/subscribe hub: a channel→subscriber-list map guarded by
//! per-channel stripe locks.
//!
//! Message delivery writes into each subscriber connection's outbound
//! channel, whose single writer task keeps socket writes serialized.

use crate::connection::Session;
use crate::core::locking::StripeLock;
use crate::core::storage::ConcurrentDict;
use crate::core::{OpalDBError, RespFrame};
use bytes::Bytes;
use tokio::sync::mpsc;

const HUB_LOCKER_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct Subscriber {
    session_id: u64,
    out: mpsc::UnboundedSender<RespFrame>,
}

pub struct Hub {
    subscribers: ConcurrentDict<Vec<Subscriber>>,
    locker: StripeLock,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            subscribers: ConcurrentDict::new(HUB_LOCKER_CAPACITY),
            locker: StripeLock::new(HUB_LOCKER_CAPACITY),
        }
    }

    /// Adds the session to each channel's subscriber list (idempotent) and
    /// writes a confirmation per newly joined channel.
    pub async fn subscribe(&self, session: &mut Session, channels: &[Bytes]) {
        for channel in channels {
            let _guard = self.locker.lock_key(channel).await;
            session.channels.insert(channel.clone());
            let subscriber = Subscriber {
                session_id: session.id,
                out: session.out_sender(),
            };
            let added = self.subscribers.upsert(channel.clone(), Vec::new, |list| {
                if list.iter().any(|s| s.session_id == subscriber.session_id) {
                    false
                } else {
                    list.push(subscriber);
                    true
                }
            });
            if added {
                session.write_frame(membership_frame("subscribe", channel, session.channels.len()));
            }
        }
    }

    /// Removes the session from the given channels, or from every channel it
    /// is subscribed to when none are given.
    pub async fn unsubscribe(&self, session: &mut Session, channels: &[Bytes]) {
        let targets: Vec<Bytes> = if channels.is_empty() {
            session.channels.iter().cloned().collect()
        } else {
            channels.to_vec()
        };
        if targets.is_empty() {
            session.write_frame(RespFrame::Array(vec![
                RespFrame::BulkString(Bytes::from_static(b"unsubscribe")),
                RespFrame::Null,
                RespFrame::Integer(0),
            ]));
            return;
        }
        for channel in targets {
            if self.remove_subscriber(session, &channel).await {
                session.write_frame(membership_frame(
                    "unsubscribe",
                    &channel,
                    session.channels.len(),
                ));
            }
        }
    }

    /// Connection teardown: drop the session from every channel silently.
    pub async fn unsubscribe_all(&self, session: &mut Session) {
        let channels: Vec<Bytes> = session.channels.iter().cloned().collect();
        for channel in channels {
            self.remove_subscriber(session, &channel).await;
        }
    }

    async fn remove_subscriber(&self, session: &mut Session, channel: &Bytes) -> bool {
        let _guard = self.locker.lock_key(channel).await;
        session.channels.remove(channel);
        let (removed, emptied) = self
            .subscribers
            .update(channel, |list| {
                let before = list.len();
                list.retain(|s| s.session_id != session.id);
                (before != list.len(), list.is_empty())
            })
            .unwrap_or((false, false));
        if emptied {
            self.subscribers.remove(channel);
        }
        removed
    }

    /// Fans the payload out to every subscriber of the channel. Returns the
    /// number of subscribers the message was delivered to.
    pub async fn publish(&self, args: &[Bytes]) -> RespFrame {
        if args.len() != 2 {
            return OpalDBError::WrongArgumentCount("publish".into()).into();
        }
        let (channel, payload) = (&args[0], &args[1]);
        let _guard = self.locker.lock_key(channel).await;
        let Some(list) = self.subscribers.get(channel) else {
            return RespFrame::Integer(0);
        };
        let message = RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"message")),
            RespFrame::BulkString(channel.clone()),
            RespFrame::BulkString(payload.clone()),
        ]);
        for subscriber in &list {
            let _ = subscriber.out.send(message.clone());
        }
        RespFrame::Integer(list.len() as i64)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

fn membership_frame(kind: &'static str, channel: &Bytes, count: usize) -> RespFrame {
    RespFrame::Array(vec![
        RespFrame::BulkString(Bytes::from_static(kind.as_bytes())),
        RespFrame::BulkString(channel.clone()),
        RespFrame::Integer(count as i64),
    ])
}
