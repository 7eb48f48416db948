use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub type VisibilityCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct Subscribers {
    visible: bool,
    next_id: u64,
    callbacks: Vec<(u64, VisibilityCallback)>,
}

/// Tracks whether the quiz surface is visible and fans transitions out to
/// subscribers.
///
/// Platform adapters call [`VisibilityMonitor::report`]; clones share state.
#[derive(Clone)]
pub struct VisibilityMonitor {
    supported: bool,
    inner: Arc<Mutex<Subscribers>>,
}

impl VisibilityMonitor {
    /// A supported monitor that starts out visible.
    pub fn new() -> Self {
        Self::with_support(true)
    }

    /// For surfaces with no visibility signal; always reports visible.
    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            supported,
            inner: Arc::new(Mutex::new(Subscribers {
                visible: true,
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        lock_subscribers(&self.inner)
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    pub fn on_visibility_change<F>(&self, callback: F) -> VisibilitySubscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.callbacks.push((id, Arc::new(callback)));

        VisibilitySubscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Feeds a platform visibility signal. Repeats of the current state are dropped.
    pub fn report(&self, visible: bool) {
        if !self.supported {
            return;
        }

        let callbacks: Vec<VisibilityCallback> = {
            let mut inner = self.lock();
            if inner.visible == visible {
                return;
            }
            inner.visible = visible;
            inner.callbacks.iter().map(|(_, cb)| cb.clone()).collect()
        };

        tracing::debug!(
            "Visibility changed: visible={}, subscribers={}",
            visible,
            callbacks.len()
        );
        for callback in callbacks {
            callback(visible);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().callbacks.len()
    }
}

impl Default for VisibilityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivery stops when this is dropped or [`unsubscribe`](Self::unsubscribe)d.
pub struct VisibilitySubscription {
    id: u64,
    monitor: Weak<Mutex<Subscribers>>,
}

impl VisibilitySubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for VisibilitySubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            lock_subscribers(&inner)
                .callbacks
                .retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock_subscribers(inner: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
