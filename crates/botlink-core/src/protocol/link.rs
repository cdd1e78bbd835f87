//! Transport abstraction
//!
//! The BLE collaborator adapts its serial characteristic to [`RobotLink`].
//! Inbound data and disconnect events are delivered through callbacks;
//! registering a callback hands back a [`Subscription`] that unsubscribes
//! when dropped.

use std::fmt;
use std::future::Future;

use super::ProtocolError;

/// Callback invoked with every inbound payload
pub type DataCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Callback invoked once when the link drops
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// Abstraction for the duplex byte link to a robot
pub trait RobotLink: Send + Sync + 'static {
    /// Stable identifier of the remote device
    fn id(&self) -> &str;

    /// Advertised name of the remote device
    fn name(&self) -> &str;

    /// Write one payload; resolves once the underlying write completes
    fn write(&self, data: &[u8]) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Register for inbound payloads
    fn on_data_received(&self, callback: DataCallback) -> Subscription;

    /// Register for link drop notification
    fn on_disconnect(&self, callback: DisconnectCallback) -> Subscription;

    /// Close the link
    fn disconnect(&self) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

/// Handle to a registered callback; unsubscribes on drop
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `release` when it ends
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Unsubscribe now
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_subscription_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_releases_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let counter = count.clone();
            let _subscription = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
