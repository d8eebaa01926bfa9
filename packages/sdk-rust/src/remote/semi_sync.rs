//! Pending semi-synchronous replies.
//!
//! A semi-sync request is acknowledged by the broker right away; the real
//! reply arrives later through the inbound path and is matched back to the
//! waiting caller by the span id of the outbound request.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use sedmesh_core::Message;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub struct PendingReplies {
    waiters: DashMap<String, (u64, oneshot::Sender<Message>)>,
    next_ticket: AtomicU64,
}

/// A registered wait. Dropping it unregisters the key.
#[derive(Debug)]
pub struct PendingReply<'a> {
    table: &'a PendingReplies,
    key: String,
    ticket: u64,
    rx: Option<oneshot::Receiver<Message>>,
}

impl PendingReplies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `key`, replacing any previous one.
    pub fn register(&self, key: impl Into<String>) -> PendingReply<'_> {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.waiters.insert(key.clone(), (ticket, tx));
        PendingReply {
            table: self,
            key,
            ticket,
            rx: Some(rx),
        }
    }

    /// Hands `reply` to the waiter of `key`. Returns `false` when nobody is
    /// waiting, e.g. the caller already timed out.
    pub fn complete(&self, key: &str, reply: Message) -> bool {
        match self.waiters.remove(key) {
            Some((_, (_, tx))) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

impl PendingReply<'_> {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the reply. `None` if the waiter was replaced.
    pub async fn wait(mut self) -> Option<Message> {
        let rx = self.rx.take()?;
        rx.await.ok()
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.table
            .waiters
            .remove_if(&self.key, |_, (ticket, _)| *ticket == self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn reply_reaches_waiter() {
        let table = PendingReplies::new();
        let pending = table.register("span-1");
        assert_eq!(table.len(), 1);
        assert!(table.complete("span-1", Message::request(9, "E", b"ok".to_vec())));
        let reply = pending.wait().await.unwrap();
        assert_eq!(reply.id, 9);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn late_reply_finds_nobody() {
        let table = PendingReplies::new();
        let pending = table.register("span-1");
        let waited = tokio::time::timeout(Duration::from_millis(10), pending.wait()).await;
        assert!(waited.is_err());
        assert!(table.is_empty());
        assert!(!table.complete("span-1", Message::default()));
    }

    #[test]
    fn dropping_a_waiter_unregisters_it() {
        let table = PendingReplies::new();
        drop(table.register("span-1"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn replaced_waiter_keeps_the_new_registration() {
        let table = PendingReplies::new();
        let first = table.register("span-1");
        let second = table.register("span-1");
        assert!(first.wait().await.is_none());
        assert_eq!(table.len(), 1);
        assert!(table.complete("span-1", Message::default()));
        assert!(second.wait().await.is_some());
    }
}
