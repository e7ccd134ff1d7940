// Reusable per-client connection buffers backing delta output.
//
// Delta sizes are strongly correlated across successive polls of the same
// client, so each client keeps a slab that is checked out for the duration
// of one delta and returned (capacity intact) when the caller drops it.

use std::collections::HashMap;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};

use crate::model::ConnectionStats;

/// A growable slab of connection records.
#[derive(Debug, Default)]
pub struct ConnectionBuffer(Vec<ConnectionStats>);

impl ConnectionBuffer {
    /// Copy a batch of records onto the end of the filled prefix.
    pub fn append(&mut self, conns: &[ConnectionStats]) {
        self.0.extend_from_slice(conns);
    }

    /// Grow the filled prefix by one slot and return it for writing.
    pub fn next(&mut self) -> &mut ConnectionStats {
        self.0.push(ConnectionStats::default());
        self.0.last_mut().expect("slot pushed above")
    }

    /// The filled prefix.
    pub fn connections(&self) -> &[ConnectionStats] {
        &self.0
    }

    pub(crate) fn connections_mut(&mut self) -> &mut [ConnectionStats] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// Idle slabs keyed by client id.
///
/// The pool has its own short-lived lock, separate from the registry lock;
/// nothing ever takes the registry lock while holding this one.
#[derive(Debug, Default)]
pub struct ClientBufferPool {
    slabs: Mutex<HashMap<String, ConnectionBuffer>>,
}

impl ClientBufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Check out the client's slab, creating one on first use. The slab is
    /// returned empty with its previous capacity intact.
    pub fn checkout(self: &Arc<Self>, client_id: &str) -> ClientBuffer {
        let mut buf = self
            .slabs
            .lock()
            .expect("buffer pool lock poisoned")
            .remove(client_id)
            .unwrap_or_default();
        buf.clear();

        ClientBuffer {
            client_id: client_id.to_string(),
            buf,
            pool: Arc::downgrade(self),
        }
    }

    /// Drop the idle slab of a removed client.
    pub fn remove_client(&self, client_id: &str) {
        self.slabs
            .lock()
            .expect("buffer pool lock poisoned")
            .remove(client_id);
    }

    fn restore(&self, client_id: String, buf: ConnectionBuffer) {
        self.slabs
            .lock()
            .expect("buffer pool lock poisoned")
            .insert(client_id, buf);
    }

    #[cfg(test)]
    fn idle_slabs(&self) -> usize {
        self.slabs.lock().expect("buffer pool lock poisoned").len()
    }
}

/// A checked-out slab. Dereferences to [`ConnectionBuffer`]; on drop the slab
/// goes back to the pool so the client's next delta can reuse its capacity.
#[derive(Debug)]
pub struct ClientBuffer {
    client_id: String,
    buf: ConnectionBuffer,
    pool: Weak<ClientBufferPool>,
}

impl Deref for ClientBuffer {
    type Target = ConnectionBuffer;

    fn deref(&self) -> &ConnectionBuffer {
        &self.buf
    }
}

impl DerefMut for ClientBuffer {
    fn deref_mut(&mut self) -> &mut ConnectionBuffer {
        &mut self.buf
    }
}

impl Drop for ClientBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.restore(mem::take(&mut self.client_id), mem::take(&mut self.buf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ut_next_grows_prefix
    #[test]
    fn ut_next_grows_prefix() {
        let pool = ClientBufferPool::new();
        let mut buf = pool.checkout("a");
        assert!(buf.is_empty());

        buf.next().monotonic_sent_bytes = 42;
        buf.next().monotonic_sent_bytes = 43;

        let conns = buf.connections();
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[0].monotonic_sent_bytes, 42);
        assert_eq!(conns[1].monotonic_sent_bytes, 43);
    }

    // ut_append_copies_batch
    #[test]
    fn ut_append_copies_batch() {
        let pool = ClientBufferPool::new();
        let mut buf = pool.checkout("a");

        let batch = vec![ConnectionStats::default(); 3];
        buf.append(&batch);
        assert_eq!(buf.len(), 3);
    }

    // ut_checkout_reuses_capacity: the slab returned on drop keeps its
    // allocation for the next checkout
    #[test]
    fn ut_checkout_reuses_capacity() {
        let pool = ClientBufferPool::new();

        let mut buf = pool.checkout("a");
        buf.append(&vec![ConnectionStats::default(); 128]);
        drop(buf);
        assert_eq!(pool.idle_slabs(), 1);

        let buf = pool.checkout("a");
        assert!(buf.is_empty());
        assert!(buf.buf.0.capacity() >= 128);
        assert_eq!(pool.idle_slabs(), 0);
    }

    // ut_slabs_are_per_client
    #[test]
    fn ut_slabs_are_per_client() {
        let pool = ClientBufferPool::new();
        drop(pool.checkout("a"));
        drop(pool.checkout("b"));
        assert_eq!(pool.idle_slabs(), 2);
    }

    // ut_remove_client_releases_slab
    #[test]
    fn ut_remove_client_releases_slab() {
        let pool = ClientBufferPool::new();
        drop(pool.checkout("a"));
        assert_eq!(pool.idle_slabs(), 1);

        pool.remove_client("a");
        assert_eq!(pool.idle_slabs(), 0);
    }

    // ut_drop_after_pool_gone: returning a slab to a dropped pool is a no-op
    #[test]
    fn ut_drop_after_pool_gone() {
        let pool = ClientBufferPool::new();
        let buf = pool.checkout("a");
        drop(pool);
        drop(buf); // must not panic
    }
}
