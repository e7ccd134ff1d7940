use std::collections::HashMap;
use std::time::SystemTime;

use rustc_hash::FxHashMap;

use crate::dns::DnsStatsByKeyByDomainByQtype;
use crate::http::{HttpKey, RequestStats};
use crate::key::ByteKey;
use crate::model::ConnectionStats;

/// Closed-connection buffers never shrink below this capacity.
pub(crate) const MIN_CLOSED_CAPACITY: usize = 1024;

/// Cumulative counters already accounted to a client for one flow key; the
/// baseline the next delta's `last_*` counters are computed against.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FlowTotals {
    pub total_sent: u64,
    pub total_recv: u64,
    pub total_sent_packets: u64,
    pub total_recv_packets: u64,
    pub total_retransmits: u32,
    pub total_tcp_established: u32,
    pub total_tcp_closed: u32,
}

/// Everything the registry retains for one polling consumer between deltas.
#[derive(Debug)]
pub(crate) struct Client {
    pub last_fetch: SystemTime,
    pub closed_connections: Vec<ConnectionStats>,
    /// Index into `closed_connections` per key, used to coalesce repeated
    /// reports of the same closed flow.
    pub closed_connection_keys: FxHashMap<ByteKey, usize>,
    pub stats: FxHashMap<ByteKey, FlowTotals>,
    pub dns_stats: DnsStatsByKeyByDomainByQtype,
    pub http_stats_delta: HashMap<HttpKey, RequestStats>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            last_fetch: SystemTime::now(),
            closed_connections: Vec::with_capacity(MIN_CLOSED_CAPACITY),
            closed_connection_keys: FxHashMap::default(),
            stats: FxHashMap::default(),
            dns_stats: DnsStatsByKeyByDomainByQtype::default(),
            http_stats_delta: HashMap::new(),
        }
    }

    /// Post-delta cleanup: empty the closed buffer (shrinking geometrically
    /// after a burst), drop the pending DNS/HTTP deltas, and rebuild `stats`
    /// keeping only flows present in the active set.
    ///
    /// `stats` is rebuilt into a fresh map rather than drained in place so a
    /// burst of short-lived flows does not leave oversized buckets behind.
    pub fn reset(&mut self, active: &FxHashMap<ByteKey, usize>) {
        let cap = self.closed_connections.capacity();
        if cap > MIN_CLOSED_CAPACITY && self.closed_connections.len() < cap / 2 {
            self.closed_connections = Vec::with_capacity(cap / 2);
        } else {
            self.closed_connections.clear();
        }

        self.closed_connection_keys = FxHashMap::default();
        self.dns_stats = DnsStatsByKeyByDomainByQtype::default();
        self.http_stats_delta = HashMap::new();

        let mut fresh = FxHashMap::with_capacity_and_hasher(
            self.stats.len().min(active.len()),
            Default::default(),
        );
        for (key, totals) in self.stats.drain() {
            if active.contains_key(&key) {
                fresh.insert(key, totals);
            }
        }
        self.stats = fresh;
    }
}
