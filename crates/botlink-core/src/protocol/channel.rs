//! Request/response channel
//!
//! Serializes command exchanges over a [`RobotLink`]. The link has no
//! multiplexing or correlation IDs, so exactly one waiter may be pending at
//! a time: a second concurrent waiter is rejected with
//! [`ProtocolError::ChannelBusy`] instead of replacing the first.
//!
//! Payloads that arrive while nobody is waiting are kept in a bounded inbox
//! so bursts (download packets, acks delivered inside `write`) are not lost.
//! The inbox is cleared before every write.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::framing::{latin1_decode, latin1_encode};
use super::{Command, ProtocolError, RobotLink, Subscription, MAX_INBOX_LEN};

type Waiter = oneshot::Sender<Result<Vec<u8>, ProtocolError>>;

/// What a text response must look like
#[derive(Debug, Clone, Copy)]
pub enum Expect<'a> {
    /// Exact literal after trimming whitespace
    Literal(&'a str),
    /// Text starting with the given prefix
    Prefix(&'a str),
    /// Text matching a regular expression
    Pattern(&'a Regex),
}

impl Expect<'_> {
    fn matches(&self, text: &str) -> bool {
        match self {
            Expect::Literal(literal) => text == *literal,
            Expect::Prefix(prefix) => text.starts_with(prefix),
            Expect::Pattern(re) => re.is_match(text),
        }
    }

    fn describe(&self) -> String {
        match self {
            Expect::Literal(literal) => (*literal).to_string(),
            Expect::Prefix(prefix) => format!("{}...", prefix),
            Expect::Pattern(re) => re.as_str().to_string(),
        }
    }
}

/// Cumulative traffic counters of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounters {
    /// Bytes written to the link
    pub tx_bytes: u64,
    /// Bytes received from the link
    pub rx_bytes: u64,
    /// Payloads written
    pub tx_packets: u64,
    /// Payloads received
    pub rx_packets: u64,
}

struct ChannelShared {
    /// The single pending-response slot
    pending: Option<(u64, Waiter)>,
    next_waiter_id: u64,
    inbox: VecDeque<Vec<u8>>,
    inbox_capacity: usize,
    closed: bool,
    counters: ChannelCounters,
}

fn lock(shared: &Mutex<ChannelShared>) -> MutexGuard<'_, ChannelShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChannelShared {
    fn deliver(&mut self, data: Vec<u8>) {
        if self.closed {
            return;
        }
        self.counters.rx_bytes = self.counters.rx_bytes.saturating_add(data.len() as u64);
        self.counters.rx_packets = self.counters.rx_packets.saturating_add(1);

        let data = match self.pending.take() {
            Some((_, waiter)) => match waiter.send(Ok(data)) {
                Ok(()) => return,
                // Waiter gave up between timeout and delivery
                Err(returned) => match returned {
                    Ok(data) => data,
                    Err(_) => return,
                },
            },
            None => data,
        };

        if self.inbox.len() >= self.inbox_capacity {
            warn!(
                "Channel inbox full ({} payloads), dropping oldest",
                self.inbox_capacity
            );
            self.inbox.pop_front();
        }
        debug!("Queued unclaimed payload of {} bytes", data.len());
        self.inbox.push_back(data);
    }

    fn close(&mut self) {
        self.closed = true;
        self.inbox.clear();
        if let Some((_, waiter)) = self.pending.take() {
            let _ = waiter.send(Err(ProtocolError::ConnectionClosed));
        }
    }
}

/// Clears the pending slot when an `await_response` future completes or is dropped
struct PendingGuard<'a> {
    shared: &'a Mutex<ChannelShared>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut shared = lock(self.shared);
        if matches!(shared.pending, Some((id, _)) if id == self.id) {
            shared.pending = None;
        }
    }
}

/// Serialized request/response channel over a robot link
pub struct DeviceChannel<L: RobotLink> {
    link: Arc<L>,
    shared: Arc<Mutex<ChannelShared>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<L: RobotLink> DeviceChannel<L> {
    /// Open a channel: subscribe to inbound data and link drop
    pub fn open(link: Arc<L>) -> Self {
        Self::with_inbox_capacity(link, MAX_INBOX_LEN)
    }

    /// Open a channel keeping at most `inbox_capacity` unclaimed payloads
    pub fn with_inbox_capacity(link: Arc<L>, inbox_capacity: usize) -> Self {
        let shared = Arc::new(Mutex::new(ChannelShared {
            pending: None,
            next_waiter_id: 0,
            inbox: VecDeque::new(),
            inbox_capacity: inbox_capacity.max(1),
            closed: false,
            counters: ChannelCounters::default(),
        }));

        let data_shared = shared.clone();
        let data_subscription = link.on_data_received(Box::new(move |data: &[u8]| {
            lock(&data_shared).deliver(data.to_vec());
        }));

        let drop_shared = shared.clone();
        let link_id = link.id().to_string();
        let disconnect_subscription = link.on_disconnect(Box::new(move || {
            warn!("Link {} dropped", link_id);
            lock(&drop_shared).close();
        }));

        Self {
            link,
            shared,
            subscriptions: Mutex::new(vec![data_subscription, disconnect_subscription]),
        }
    }

    /// The link this channel writes to
    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// True once disposed or after the link dropped
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    /// Cumulative traffic counters
    pub fn counters(&self) -> ChannelCounters {
        lock(&self.shared).counters
    }

    /// Write one payload without waiting for a reply
    pub async fn send(&self, data: &[u8]) -> Result<(), ProtocolError> {
        {
            let mut shared = lock(&self.shared);
            if shared.closed {
                return Err(ProtocolError::ConnectionClosed);
            }
            if shared.pending.is_some() {
                return Err(ProtocolError::ChannelBusy);
            }
            if !shared.inbox.is_empty() {
                debug!("Discarding {} stale payloads before write", shared.inbox.len());
                shared.inbox.clear();
            }
            shared.counters.tx_bytes = shared.counters.tx_bytes.saturating_add(data.len() as u64);
            shared.counters.tx_packets = shared.counters.tx_packets.saturating_add(1);
        }

        debug!("send: {} bytes: {:02x?}", data.len(), data);
        self.link.write(data).await
    }

    /// Write Latin-1 text
    pub async fn send_text(&self, text: &str) -> Result<(), ProtocolError> {
        debug!("send_text: {:?}", text);
        self.send(&latin1_encode(text)).await
    }

    /// Write a protocol command
    pub async fn send_command(&self, command: Command) -> Result<(), ProtocolError> {
        self.send_text(&command.text()).await
    }

    /// Wait for the next inbound payload
    pub async fn await_response(&self, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let (id, receiver) = {
            let mut shared = lock(&self.shared);
            if shared.closed {
                return Err(ProtocolError::ConnectionClosed);
            }
            if let Some(data) = shared.inbox.pop_front() {
                return Ok(data);
            }
            if shared.pending.is_some() {
                return Err(ProtocolError::ChannelBusy);
            }
            let (sender, receiver) = oneshot::channel();
            let id = shared.next_waiter_id;
            shared.next_waiter_id = shared.next_waiter_id.wrapping_add(1);
            shared.pending = Some((id, sender));
            (id, receiver)
        };
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                debug!("await_response: timed out after {}ms", timeout.as_millis());
                Err(ProtocolError::Timeout)
            }
        }
    }

    /// Write a payload and wait for the reply as one exchange
    pub async fn request(
        &self,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.send(data).await?;
        self.await_response(timeout).await
    }

    /// Wait for a text reply and check it against `expect`
    pub async fn await_text_response(
        &self,
        expect: Expect<'_>,
        timeout: Duration,
    ) -> Result<String, ProtocolError> {
        let payload = self.await_response(timeout).await?;
        let text = latin1_decode(&payload).trim().to_string();
        debug!("await_text_response: {:?}", text);
        if expect.matches(&text) {
            Ok(text)
        } else {
            Err(ProtocolError::unexpected(expect.describe(), text))
        }
    }

    /// Write text and wait for a text reply matching `expect`
    pub async fn request_text(
        &self,
        text: &str,
        expect: Expect<'_>,
        timeout: Duration,
    ) -> Result<String, ProtocolError> {
        self.send_text(text).await?;
        self.await_text_response(expect, timeout).await
    }

    /// Write a command and wait for a text reply matching `expect`
    pub async fn request_command(
        &self,
        command: Command,
        expect: Expect<'_>,
        timeout: Duration,
    ) -> Result<String, ProtocolError> {
        self.request_text(&command.text(), expect, timeout).await
    }

    /// Keep waiting for payloads until `stop` says the accumulated list is complete.
    ///
    /// `timeout` applies to each payload separately.
    pub async fn collect_responses<F>(
        &self,
        mut stop: F,
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, ProtocolError>
    where
        F: FnMut(&[Vec<u8>]) -> bool,
    {
        let mut responses = Vec::new();
        while !stop(&responses) {
            let payload = self.await_response(timeout).await?;
            responses.push(payload);
        }
        Ok(responses)
    }

    /// Unsubscribe from the link and fail any pending waiter
    pub fn dispose(&self) {
        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        drop(subscriptions);
        lock(&self.shared).close();
    }
}

impl<L: RobotLink> Drop for DeviceChannel<L> {
    fn drop(&mut self) {
        self.dispose();
    }
}
