//! Channel listener bookkeeping for the postgres notification loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::{ListenerId, NotifyCallback};

#[derive(Default)]
struct Registrations {
    by_channel: HashMap<String, Vec<(ListenerId, NotifyCallback)>>,
    channel_of: HashMap<ListenerId, String>,
}

/// Maps channels to the callbacks listening on them.
///
/// Several listeners may share one channel; the server-side `LISTEN` is
/// only needed for the first and `UNLISTEN` only after the last.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    inner: Mutex<Registrations>,
}

impl ListenerRegistry {
    fn lock(&self) -> MutexGuard<'_, Registrations> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback. Returns its id and whether it is the channel's first listener.
    pub(crate) fn register(&self, channel: &str, callback: NotifyCallback) -> (ListenerId, bool) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.lock();
        let entries = inner.by_channel.entry(channel.to_string()).or_default();
        let first = entries.is_empty();
        entries.push((id, callback));
        inner.channel_of.insert(id, channel.to_string());
        (id, first)
    }

    /// Remove a callback. Returns its channel and whether the channel has no listeners left.
    pub(crate) fn unregister(&self, id: ListenerId) -> Option<(String, bool)> {
        let mut inner = self.lock();
        let channel = inner.channel_of.remove(&id)?;
        let now_empty = match inner.by_channel.get_mut(&channel) {
            Some(entries) => {
                entries.retain(|(entry_id, _)| *entry_id != id);
                entries.is_empty()
            }
            None => true,
        };
        if now_empty {
            inner.by_channel.remove(&channel);
        }
        Some((channel, now_empty))
    }

    /// Invoke every callback on `channel`. Returns how many ran.
    pub(crate) fn dispatch(&self, channel: &str) -> usize {
        // Callbacks run outside the lock so they may register or unregister.
        let callbacks: Vec<NotifyCallback> = self
            .lock()
            .by_channel
            .get(channel)
            .map(|entries| entries.iter().map(|(_, cb)| NotifyCallback::clone(cb)).collect())
            .unwrap_or_default();
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }

    #[cfg(test)]
    fn listener_count(&self, channel: &str) -> usize {
        self.lock().by_channel.get(channel).map_or(0, Vec::len)
    }
}
