//! Per-tracker single-slot reply mailbox

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use trackgate_shared::Message;

/// Outcome of waiting on a reply slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(Message),
    TimedOut,
}

/// Bridges device replies to the command handler waiting for them
///
/// Only one slot may exist per IMEI. A second command for the same tracker
/// polls until the first releases its slot; waiters are not queued, so there
/// is no ordering among them.
pub struct ReplyCorrelator {
    slots: Mutex<HashMap<String, mpsc::Sender<Message>>>,
    poll_interval: Duration,
}

impl ReplyCorrelator {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            poll_interval,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, mpsc::Sender<Message>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `imei`, retrying every poll interval while it is taken
    pub async fn acquire(&self, imei: &str) -> ReplySlot<'_> {
        loop {
            if let Some(slot) = self.try_acquire(imei) {
                return slot;
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Claim the slot for `imei` if nobody holds it
    pub fn try_acquire(&self, imei: &str) -> Option<ReplySlot<'_>> {
        let mut slots = self.slots();
        match slots.entry(imei.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let (tx, rx) = mpsc::channel(1);
                vacant.insert(tx.clone());
                Some(ReplySlot {
                    correlator: self,
                    imei: imei.to_string(),
                    tx,
                    rx,
                })
            }
        }
    }

    /// Remove the slot for `imei` unconditionally
    pub fn release(&self, imei: &str) {
        self.slots().remove(imei);
    }

    /// Offer a device message to whoever holds the slot for `imei`
    ///
    /// Never blocks. Returns `false` when the message was dropped because no
    /// slot exists or the slot already holds an undelivered message.
    pub fn deliver(&self, imei: &str, message: Message) -> bool {
        let slots = self.slots();
        match slots.get(imei) {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Whether a command currently holds the slot for `imei`
    pub fn is_pending(&self, imei: &str) -> bool {
        self.slots().contains_key(imei)
    }
}

/// A claimed reply slot; released when dropped
///
/// Dropping covers every exit path, including the HTTP caller going away
/// and the handler future being cancelled mid-wait.
pub struct ReplySlot<'a> {
    correlator: &'a ReplyCorrelator,
    imei: String,
    /// Identifies this claim in the slot map
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
}

impl ReplySlot<'_> {
    /// Wait for the device reply or until `limit` elapses
    pub async fn wait(&mut self, limit: Duration) -> Reply {
        match timeout(limit, self.rx.recv()).await {
            Ok(Some(message)) => Reply::Message(message),
            // The slot keeps its own sender, so the channel cannot close
            // under us; `None` is unreachable in practice.
            Ok(None) | Err(_) => Reply::TimedOut,
        }
    }
}

impl Drop for ReplySlot<'_> {
    fn drop(&mut self) {
        let mut slots = self.correlator.slots();
        if let Entry::Occupied(entry) = slots.entry(self.imei.clone()) {
            if entry.get().same_channel(&self.tx) {
                entry.remove();
            }
        }
    }
}
