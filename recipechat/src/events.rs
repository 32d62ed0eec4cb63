//! Typed publish/subscribe registry decoupling transports from UI consumers.
//!
//! An [`EventHub`] owns one [`Topic`] per event category (`open`, `close`,
//! `error`, `message`, `status`). Subscribers register closures and get back a
//! [`Subscription`] disposer. Delivery within a topic follows subscription
//! order; a panicking subscriber is logged and skipped so that its siblings
//! still receive the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use recipechat_proto::message::ChatMessage;

use crate::status::ConnectionStatus;
use crate::transport::{CloseInfo, TransportError};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listener<T> {
    id: u64,
    callback: Callback<T>,
    active: Arc<AtomicBool>,
    once: bool,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
            active: Arc::clone(&self.active),
            once: self.once,
        }
    }
}

/// One event category with its ordered set of subscribers.
pub struct Topic<T> {
    name: &'static str,
    listeners: Arc<Mutex<Vec<Listener<T>>>>,
    next_id: AtomicU64,
}

impl<T: 'static> Topic<T> {
    /// Creates an empty topic. `name` only appears in logs.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers `callback` for every future publish on this topic.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(Arc::new(callback), false)
    }

    /// Registers `callback` for the next publish only.
    ///
    /// The returned [`Subscription`] can still cancel the callback before it
    /// fires.
    pub fn subscribe_once<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(Arc::new(callback), true)
    }

    fn register(&self, callback: Callback<T>, once: bool) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.listeners.lock().push(Listener {
            id,
            callback,
            active: Arc::clone(&active),
            once,
        });

        let listeners: Weak<Mutex<Vec<Listener<T>>>> = Arc::downgrade(&self.listeners);
        Subscription {
            active,
            detach: Box::new(move || {
                if let Some(listeners) = listeners.upgrade() {
                    listeners.lock().retain(|l| l.id != id);
                }
            }),
        }
    }

    /// Delivers `payload` to every current subscriber in subscription order.
    ///
    /// The subscriber list is snapshotted before delivery, so callbacks may
    /// subscribe or unsubscribe freely. A callback unsubscribed earlier in the
    /// same pass is skipped. Returns the number of callbacks invoked.
    pub fn publish(&self, payload: &T) -> usize {
        let snapshot: Vec<Listener<T>> = self.listeners.lock().clone();
        let mut delivered = 0;
        let mut fired_once = false;

        for listener in snapshot {
            if listener.once {
                if !listener.active.swap(false, Ordering::AcqRel) {
                    continue;
                }
                fired_once = true;
            } else if !listener.active.load(Ordering::Acquire) {
                continue;
            }

            delivered += 1;
            let callback = &listener.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                tracing::warn!(
                    topic = self.name,
                    subscriber = listener.id,
                    "subscriber panicked, continuing delivery"
                );
            }
        }

        if fired_once {
            self.listeners
                .lock()
                .retain(|l| l.active.load(Ordering::Acquire));
        }
        delivered
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether the topic has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

/// Disposer returned by [`Topic::subscribe`].
///
/// Dropping a `Subscription` does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe). Calling it more than once is harmless.
pub struct Subscription {
    active: Arc<AtomicBool>,
    detach: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    /// Removes the callback from its topic. Idempotent.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.detach)();
        }
    }

    /// Whether the callback is still registered.
    ///
    /// A one-shot subscription becomes inactive once it has fired.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// The five event categories a chat client publishes.
pub struct EventHub {
    /// Fired when a channel becomes usable.
    pub open: Topic<()>,
    /// Fired when a channel goes away.
    pub close: Topic<CloseInfo>,
    /// Fired on transport failures.
    pub error: Topic<TransportError>,
    /// Fired for every normalized inbound message.
    pub message: Topic<ChatMessage>,
    /// Fired on every status transition.
    pub status: Topic<ConnectionStatus>,
}

impl EventHub {
    /// Creates a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: Topic::new("open"),
            close: Topic::new("close"),
            error: Topic::new("error"),
            message: Topic::new("message"),
            status: Topic::new("status"),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
