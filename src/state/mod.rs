// Per-client connection state tracking.
//
// The registry ingests connection snapshots from the probe plus DNS/HTTP
// per-flow stats, and produces for each polling client a delta of what
// changed since that client's previous poll: last-interval counters computed
// against per-flow baselines, coalesced closed connections, and the pending
// DNS/HTTP stats. All registry state is serialized by one lock.

mod buffer;
mod client;
mod intrahost;

pub use buffer::{ClientBuffer, ConnectionBuffer};

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::dns::{self, DnsStatsByDomainByQtype, DnsStatsByKeyByDomainByQtype};
use crate::http::{HttpKey, RequestStats};
use crate::key::{ByteKey, CONNECTION_BYTE_KEY_MAX_LEN};
use crate::model::ConnectionStats;
use buffer::ClientBufferPool;
use client::{Client, FlowTotals};
use intrahost::classify_intra_host;

/// Client id reserved for the debugging consumer.
pub const DEBUG_CLIENT_ID: &str = "-1";

/// Capacity ceilings and expiry applied to every client.
#[derive(Debug, Clone, Copy)]
pub struct StateConfig {
    /// How long a client may go without polling before it is reclaimed.
    pub client_expiry: Duration,
    /// Per-client cap on buffered closed connections.
    pub max_closed_conns: usize,
    /// Per-client cap on distinct flow keys tracked as delta baselines.
    pub max_client_stats: usize,
    /// Per-client cap on buffered DNS stats leaves.
    pub max_dns_stats: usize,
    /// Per-client cap on buffered HTTP stats entries.
    pub max_http_stats: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            client_expiry: Duration::from_secs(120),
            max_closed_conns: 50_000,
            max_client_stats: 75_000,
            max_dns_stats: 75_000,
            max_http_stats: 75_000,
        }
    }
}

/// Drop and anomaly counters, reported by `get_stats` and flushed to the log
/// by `remove_connections`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    pub stats_resets: u64,
    pub closed_conn_dropped: u64,
    pub conn_dropped: u64,
    pub time_sync_collisions: u64,
    pub dns_stats_dropped: u64,
    pub http_stats_dropped: u64,
}

impl Telemetry {
    fn any_nonzero(&self) -> bool {
        *self != Telemetry::default()
    }
}

/// Everything that changed for one client since its previous poll.
///
/// `conns` is backed by the client's reusable slab; it stays valid for as
/// long as the caller holds the delta and returns to the pool on drop.
#[derive(Debug)]
pub struct Delta {
    pub conns: ClientBuffer,
    pub http: HashMap<HttpKey, RequestStats>,
    pub dns: DnsStatsByKeyByDomainByQtype,
}

impl Delta {
    /// The delta's connection records.
    pub fn connections(&self) -> &[ConnectionStats] {
        self.conns.connections()
    }
}

/// Per-client sizes reported by `get_stats`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClientStats {
    pub stats: usize,
    pub closed_connections: usize,
    /// Unix seconds of the client's most recent poll.
    pub last_fetch: u64,
}

/// Snapshot of registry sizes and telemetry.
#[derive(Debug, Serialize)]
pub struct StateStats {
    pub clients: HashMap<String, ClientStats>,
    pub telemetry: Telemetry,
    /// Unix seconds at the time of the snapshot.
    pub current_time: u64,
    /// Most recent producer epoch seen by `get_delta`.
    pub latest_time_epoch: u64,
}

/// Cumulative per-flow totals of one client, keyed by beautified flow
/// identity. Debug surface only.
#[derive(Debug, Default, Serialize)]
pub struct ClientDump {
    pub flows: HashMap<String, FlowDump>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FlowDump {
    pub total_sent: u64,
    pub total_recv: u64,
    pub total_sent_packets: u64,
    pub total_recv_packets: u64,
    pub total_retransmits: u32,
    pub total_tcp_established: u32,
    pub total_tcp_closed: u32,
}

struct Inner {
    clients: HashMap<String, Client>,
    telemetry: Telemetry,
    /// Shared scratch for byte-key encoding, guarded by the registry lock.
    key_scratch: [u8; CONNECTION_BYTE_KEY_MAX_LEN],
    latest_time_epoch: u64,
    config: StateConfig,
}

/// The state registry. One instance serves all clients; every public
/// operation takes the internal lock for its full duration and never fails
/// the caller.
pub struct NetworkState {
    inner: Mutex<Inner>,
    pool: Arc<ClientBufferPool>,
}

impl NetworkState {
    pub fn new(config: StateConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                clients: HashMap::new(),
                telemetry: Telemetry::default(),
                key_scratch: [0u8; CONNECTION_BYTE_KEY_MAX_LEN],
                latest_time_epoch: 0,
                config,
            }),
            pool: ClientBufferPool::new(),
        }
    }

    /// Compute the delta for `client_id` against the latest `active`
    /// snapshot, registering the client on first call.
    ///
    /// A new client gets every active connection with zeroed last-interval
    /// counters (there is no baseline yet; consumers discard the first
    /// delta). An existing client gets its buffered closed connections
    /// merged with the active set, with per-flow baselines updated so the
    /// `last_*` counters cover exactly the interval since its previous poll.
    pub fn get_delta(
        &self,
        client_id: &str,
        latest_time: u64,
        mut active: Vec<ConnectionStats>,
        dns_stats: DnsStatsByKeyByDomainByQtype,
        http_stats: HashMap<HttpKey, RequestStats>,
    ) -> Delta {
        let mut buffer = self.pool.checkout(client_id);

        let mut guard = self.inner.lock().expect("network state lock poisoned");
        let inner = &mut *guard;

        inner.latest_time_epoch = latest_time;
        let active_by_key = conns_by_key(&active, &mut inner.key_scratch);

        let is_new = !inner.clients.contains_key(client_id);
        let client = inner
            .clients
            .entry(client_id.to_string())
            .or_insert_with(Client::new);
        client.last_fetch = SystemTime::now();

        if is_new {
            for (key, &idx) in &active_by_key {
                create_stats_for_key(
                    &mut client.stats,
                    &mut inner.telemetry,
                    inner.config.max_client_stats,
                    key,
                );
                let conn = &mut active[idx];
                update_conn_with_stats(&mut client.stats, &mut inner.telemetry, key, conn);

                // No baseline exists yet, so interval counters are
                // undefined; report them as zero and let the consumer
                // discard this first delta.
                conn.last_sent_bytes = 0;
                conn.last_recv_bytes = 0;
                conn.last_sent_packets = 0;
                conn.last_recv_packets = 0;
                conn.last_retransmits = 0;
                conn.last_tcp_established = 0;
                conn.last_tcp_closed = 0;
            }
            buffer.append(&active);
        } else {
            merge_active_and_closed(
                client,
                &active_by_key,
                &mut active,
                &mut inner.telemetry,
                inner.config.max_client_stats,
                &mut inner.key_scratch,
                &mut buffer,
            );
        }

        classify_intra_host(buffer.connections_mut());

        if !dns_stats.is_empty() {
            store_dns_stats(
                &mut inner.clients,
                &mut inner.telemetry,
                inner.config.max_dns_stats,
                dns_stats,
            );
        }
        if !http_stats.is_empty() {
            store_http_stats(
                &mut inner.clients,
                &mut inner.telemetry,
                inner.config.max_http_stats,
                &http_stats,
            );
        }

        let client = inner
            .clients
            .get_mut(client_id)
            .expect("client registered above");
        let delta = Delta {
            conns: buffer,
            http: mem::take(&mut client.http_stats_delta),
            dns: mem::take(&mut client.dns_stats),
        };
        client.reset(&active_by_key);
        delta
    }

    /// Fan a batch of closed connections out to every registered client,
    /// coalescing repeated reports of the same flow by key. Once a client's
    /// buffer is full further new flows are dropped and counted.
    pub fn store_closed_connections(&self, conns: &[ConnectionStats]) {
        let mut guard = self.inner.lock().expect("network state lock poisoned");
        let inner = &mut *guard;

        for client in inner.clients.values_mut() {
            for conn in conns {
                let Ok(key) = conn.byte_key(&mut inner.key_scratch) else {
                    continue;
                };

                if let Some(&idx) = client.closed_connection_keys.get(&key) {
                    client.closed_connections[idx].merge_from(conn);
                    continue;
                }
                if client.closed_connections.len() >= inner.config.max_closed_conns {
                    inner.telemetry.closed_conn_dropped += 1;
                    continue;
                }
                client.closed_connections.push(*conn);
                client
                    .closed_connection_keys
                    .insert(key, client.closed_connections.len() - 1);
            }
        }
    }

    /// Stop tracking state for a client and release its buffer slab.
    pub fn remove_client(&self, client_id: &str) {
        self.inner
            .lock()
            .expect("network state lock poisoned")
            .clients
            .remove(client_id);
        self.pool.remove_client(client_id);
    }

    /// Reclaim every client whose last poll is older than the expiry.
    pub fn remove_expired_clients(&self, now: SystemTime) {
        let mut guard = self.inner.lock().expect("network state lock poisoned");
        let inner = &mut *guard;
        let expiry = inner.config.client_expiry;

        inner.clients.retain(|id, client| {
            let expired = client.last_fetch + expiry < now;
            if expired {
                log::debug!(
                    "expiring client {id} with {} tracked flows and {} closed connections",
                    client.stats.len(),
                    client.closed_connections.len(),
                );
                self.pool.remove_client(id);
            }
            !expired
        });
    }

    /// Delete the given flow keys from every client's baseline table, flush
    /// a telemetry summary to the log if anything was counted, and zero the
    /// telemetry.
    pub fn remove_connections(&self, keys: &[ByteKey]) {
        let mut guard = self.inner.lock().expect("network state lock poisoned");
        let inner = &mut *guard;

        for client in inner.clients.values_mut() {
            for key in keys {
                client.stats.remove(key);
            }
        }

        let t = inner.telemetry;
        if t.any_nonzero() {
            log::warn!(
                "state telemetry: [{} stats resets] [{} flows dropped at the stats cap] \
                 [{} closed connections dropped] [{} dns stats dropped] \
                 [{} http stats dropped] [{} time sync collisions]",
                t.stats_resets,
                t.conn_dropped,
                t.closed_conn_dropped,
                t.dns_stats_dropped,
                t.http_stats_dropped,
                t.time_sync_collisions,
            );
        }
        inner.telemetry = Telemetry::default();
    }

    /// Snapshot of per-client sizes and telemetry counters.
    pub fn get_stats(&self) -> StateStats {
        let guard = self.inner.lock().expect("network state lock poisoned");

        let clients = guard
            .clients
            .iter()
            .map(|(id, client)| {
                (
                    id.clone(),
                    ClientStats {
                        stats: client.stats.len(),
                        closed_connections: client.closed_connections.len(),
                        last_fetch: unix_seconds(client.last_fetch),
                    },
                )
            })
            .collect();

        StateStats {
            clients,
            telemetry: guard.telemetry,
            current_time: unix_seconds(SystemTime::now()),
            latest_time_epoch: guard.latest_time_epoch,
        }
    }

    /// Human-readable per-flow totals for one client, for debugging.
    pub fn dump_state(&self, client_id: &str) -> ClientDump {
        let guard = self.inner.lock().expect("network state lock poisoned");

        let mut dump = ClientDump::default();
        if let Some(client) = guard.clients.get(client_id) {
            for (key, totals) in &client.stats {
                dump.flows.insert(
                    key.to_string(),
                    FlowDump {
                        total_sent: totals.total_sent,
                        total_recv: totals.total_recv,
                        total_sent_packets: totals.total_sent_packets,
                        total_recv_packets: totals.total_recv_packets,
                        total_retransmits: totals.total_retransmits,
                        total_tcp_established: totals.total_tcp_established,
                        total_tcp_closed: totals.total_tcp_closed,
                    },
                );
            }
        }
        dump
    }

    /// Ids of all registered clients, sorted.
    pub fn clients(&self) -> Vec<String> {
        let guard = self.inner.lock().expect("network state lock poisoned");
        let mut ids: Vec<String> = guard.clients.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new(StateConfig::default())
    }
}

/// Index the active snapshot by byte key. Records whose key cannot be
/// encoded are skipped; on duplicate keys the last record wins (the producer
/// guarantees unique keys in a snapshot).
fn conns_by_key(conns: &[ConnectionStats], scratch: &mut [u8]) -> FxHashMap<ByteKey, usize> {
    let mut by_key = FxHashMap::with_capacity_and_hasher(conns.len(), Default::default());
    for (idx, conn) in conns.iter().enumerate() {
        match conn.byte_key(scratch) {
            Ok(key) => {
                by_key.insert(key, idx);
            }
            Err(e) => log::debug!("failed to build connection key: {e}"),
        }
    }
    by_key
}

/// Merge a client's buffered closed connections with the active snapshot
/// into the output buffer, updating per-flow baselines along the way.
fn merge_active_and_closed(
    client: &mut Client,
    active_by_key: &FxHashMap<ByteKey, usize>,
    active: &mut [ConnectionStats],
    telemetry: &mut Telemetry,
    max_client_stats: usize,
    scratch: &mut [u8],
    buffer: &mut ClientBuffer,
) {
    let Client {
        closed_connections,
        closed_connection_keys,
        stats,
        ..
    } = client;

    for closed in closed_connections.iter_mut() {
        let key = match closed.byte_key(scratch) {
            Ok(key) => key,
            Err(e) => {
                log::debug!("skipping closed connection with unencodable key: {e}");
                continue;
            }
        };

        match active_by_key.get(&key).map(|&idx| active[idx]) {
            Some(active_conn) => {
                use std::cmp::Ordering;

                match closed.last_update_epoch.cmp(&active_conn.last_update_epoch) {
                    Ordering::Greater => {
                        // The active record predates the close; the closed
                        // record already accounts for everything it saw.
                        update_conn_with_stats(stats, telemetry, &key, closed);
                    }
                    Ordering::Less => {
                        // The flow was reopened after closing. Report the
                        // sum of both, then baseline the next interval on
                        // the reopened flow alone.
                        closed.merge_from(&active_conn);
                        create_stats_for_key(stats, telemetry, max_client_stats, &key);
                        update_conn_with_reopened(stats, telemetry, &key, &active_conn, closed);
                    }
                    Ordering::Equal => {
                        // Same epoch on both records; without a per-flow
                        // session id there is no way to order them, so the
                        // closed record wins by convention.
                        telemetry.time_sync_collisions += 1;
                        log::trace!("epoch collision between closed and active record for {key}");
                        update_conn_with_stats(stats, telemetry, &key, closed);
                    }
                }
            }
            None => update_conn_with_stats(stats, telemetry, &key, closed),
        }
    }
    buffer.append(closed_connections);

    for (key, &idx) in active_by_key {
        // Flows also present in the closed set were handled above.
        if closed_connection_keys.contains_key(key) {
            continue;
        }
        create_stats_for_key(stats, telemetry, max_client_stats, key);
        update_conn_with_stats(stats, telemetry, key, &mut active[idx]);
        *buffer.next() = active[idx];
    }
}

/// Rewrite `conn.last_*` as the growth over the stored baseline, then move
/// the baseline up to `conn`'s monotonic counters. Without a baseline (the
/// key was dropped at the stats cap) the full monotonic value is reported.
fn update_conn_with_stats(
    stats: &mut FxHashMap<ByteKey, FlowTotals>,
    telemetry: &mut Telemetry,
    key: &ByteKey,
    conn: &mut ConnectionStats,
) {
    if let Some(totals) = stats.get_mut(key) {
        handle_stats_underflow(telemetry, key, totals, conn);
        apply_last_deltas(conn, totals);
        store_totals(totals, conn);
    } else {
        set_last_to_monotonic(conn);
    }
}

/// Variant for a closed flow that reopened: `closed` already carries the
/// summed counters and gets the interval deltas, but the baseline is set to
/// the active record so the next interval sees only the reopened flow's
/// growth.
fn update_conn_with_reopened(
    stats: &mut FxHashMap<ByteKey, FlowTotals>,
    telemetry: &mut Telemetry,
    key: &ByteKey,
    active_conn: &ConnectionStats,
    closed: &mut ConnectionStats,
) {
    if let Some(totals) = stats.get_mut(key) {
        handle_stats_underflow(telemetry, key, totals, closed);
        apply_last_deltas(closed, totals);
        store_totals(totals, active_conn);
    } else {
        set_last_to_monotonic(closed);
    }
}

/// The producer restarted if a guarded counter runs backwards; zero the
/// guarded totals so the interval delta cannot underflow.
fn handle_stats_underflow(
    telemetry: &mut Telemetry,
    key: &ByteKey,
    totals: &mut FlowTotals,
    conn: &ConnectionStats,
) {
    if conn.monotonic_sent_bytes < totals.total_sent
        || conn.monotonic_recv_bytes < totals.total_recv
        || conn.monotonic_retransmits < totals.total_retransmits
    {
        telemetry.stats_resets += 1;
        log::debug!("producer counters regressed for {key}, resetting totals");
        totals.total_sent = 0;
        totals.total_recv = 0;
        totals.total_retransmits = 0;
    }
}

fn apply_last_deltas(conn: &mut ConnectionStats, totals: &FlowTotals) {
    conn.last_sent_bytes = conn.monotonic_sent_bytes.saturating_sub(totals.total_sent);
    conn.last_recv_bytes = conn.monotonic_recv_bytes.saturating_sub(totals.total_recv);
    conn.last_sent_packets = conn
        .monotonic_sent_packets
        .saturating_sub(totals.total_sent_packets);
    conn.last_recv_packets = conn
        .monotonic_recv_packets
        .saturating_sub(totals.total_recv_packets);
    conn.last_retransmits = conn
        .monotonic_retransmits
        .saturating_sub(totals.total_retransmits);
    conn.last_tcp_established = conn
        .monotonic_tcp_established
        .saturating_sub(totals.total_tcp_established);
    conn.last_tcp_closed = conn
        .monotonic_tcp_closed
        .saturating_sub(totals.total_tcp_closed);
}

fn store_totals(totals: &mut FlowTotals, conn: &ConnectionStats) {
    totals.total_sent = conn.monotonic_sent_bytes;
    totals.total_recv = conn.monotonic_recv_bytes;
    totals.total_sent_packets = conn.monotonic_sent_packets;
    totals.total_recv_packets = conn.monotonic_recv_packets;
    totals.total_retransmits = conn.monotonic_retransmits;
    totals.total_tcp_established = conn.monotonic_tcp_established;
    totals.total_tcp_closed = conn.monotonic_tcp_closed;
}

fn set_last_to_monotonic(conn: &mut ConnectionStats) {
    conn.last_sent_bytes = conn.monotonic_sent_bytes;
    conn.last_recv_bytes = conn.monotonic_recv_bytes;
    conn.last_sent_packets = conn.monotonic_sent_packets;
    conn.last_recv_packets = conn.monotonic_recv_packets;
    conn.last_retransmits = conn.monotonic_retransmits;
    conn.last_tcp_established = conn.monotonic_tcp_established;
    conn.last_tcp_closed = conn.monotonic_tcp_closed;
}

/// Track a baseline for a new flow key, unless the client is at its stats
/// cap, in which case the flow keeps being reported as a first observation
/// until headroom appears.
fn create_stats_for_key(
    stats: &mut FxHashMap<ByteKey, FlowTotals>,
    telemetry: &mut Telemetry,
    max_client_stats: usize,
    key: &ByteKey,
) {
    if !stats.contains_key(key) {
        if stats.len() >= max_client_stats {
            telemetry.conn_dropped += 1;
            return;
        }
        stats.insert(*key, FlowTotals::default());
    }
}

/// Distribute a DNS stats interval to every client's pending buffer under
/// the per-client leaf cap.
fn store_dns_stats(
    clients: &mut HashMap<String, Client>,
    telemetry: &mut Telemetry,
    max_dns_stats: usize,
    stats: DnsStatsByKeyByDomainByQtype,
) {
    // Fast path for the common single-consumer deployment: adopt the whole
    // map instead of walking it.
    if clients.len() == 1 {
        let client = clients.values_mut().next().expect("one client");
        if client.dns_stats.is_empty() {
            client.dns_stats = stats;
            return;
        }
    }

    for client in clients.values_mut() {
        let mut leaf_count = dns::deep_stats_count(&client.dns_stats);

        for (key, by_domain) in &stats {
            for (domain, by_qtype) in by_domain {
                for (qtype, leaf) in by_qtype {
                    if !client.dns_stats.contains_key(key) {
                        if leaf_count >= max_dns_stats {
                            telemetry.dns_stats_dropped += 1;
                            continue;
                        }
                        client
                            .dns_stats
                            .insert(*key, DnsStatsByDomainByQtype::default());
                    }
                    let domains = client.dns_stats.get_mut(key).expect("inserted above");

                    if !domains.contains_key(domain) {
                        if leaf_count >= max_dns_stats {
                            telemetry.dns_stats_dropped += 1;
                            continue;
                        }
                        domains.insert(domain.clone(), HashMap::new());
                    }
                    let qtypes = domains.get_mut(domain).expect("inserted above");

                    match qtypes.get_mut(qtype) {
                        Some(prev) => prev.merge_from(leaf),
                        None => {
                            if leaf_count >= max_dns_stats {
                                telemetry.dns_stats_dropped += 1;
                                continue;
                            }
                            qtypes.insert(*qtype, leaf.clone());
                            leaf_count += 1;
                        }
                    }
                }
            }
        }
    }
}

/// Distribute an HTTP stats interval to every client's pending buffer under
/// the per-client entry cap.
fn store_http_stats(
    clients: &mut HashMap<String, Client>,
    telemetry: &mut Telemetry,
    max_http_stats: usize,
    all_stats: &HashMap<HttpKey, RequestStats>,
) {
    for (key, stats) in all_stats {
        for client in clients.values_mut() {
            match client.http_stats_delta.get_mut(key) {
                Some(prev) => prev.combine_with(stats),
                None => {
                    if client.http_stats_delta.len() >= max_http_stats {
                        telemetry.http_stats_dropped += 1;
                        continue;
                    }
                    let mut fresh = RequestStats::default();
                    fresh.combine_with(stats);
                    client.http_stats_delta.insert(key.clone(), fresh);
                }
            }
        }
    }
}

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionType, Direction};
    use std::net::{IpAddr, Ipv4Addr};

    fn make_conn(sport: u16, sent: u64) -> ConnectionStats {
        ConnectionStats {
            source: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            sport,
            dest: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            dport: 80,
            conn_type: ConnectionType::Tcp,
            direction: Direction::Outgoing,
            monotonic_sent_bytes: sent,
            ..Default::default()
        }
    }

    fn key_of(conn: &ConnectionStats) -> ByteKey {
        let mut scratch = [0u8; CONNECTION_BYTE_KEY_MAX_LEN];
        conn.byte_key(&mut scratch).unwrap()
    }

    // ut_underflow_zeroes_guarded_totals
    #[test]
    fn ut_underflow_zeroes_guarded_totals() {
        let mut telemetry = Telemetry::default();
        let mut totals = FlowTotals {
            total_sent: 500,
            total_recv: 700,
            total_retransmits: 3,
            total_sent_packets: 10,
            ..Default::default()
        };
        let conn = make_conn(1000, 50); // sent regressed below 500

        handle_stats_underflow(&mut telemetry, &key_of(&conn), &mut totals, &conn);
        assert_eq!(telemetry.stats_resets, 1);
        assert_eq!(totals.total_sent, 0);
        assert_eq!(totals.total_recv, 0);
        assert_eq!(totals.total_retransmits, 0);
        // packet totals are not guarded
        assert_eq!(totals.total_sent_packets, 10);
    }

    // ut_no_underflow_on_growth
    #[test]
    fn ut_no_underflow_on_growth() {
        let mut telemetry = Telemetry::default();
        let mut totals = FlowTotals {
            total_sent: 500,
            ..Default::default()
        };
        let conn = make_conn(1000, 900);

        handle_stats_underflow(&mut telemetry, &key_of(&conn), &mut totals, &conn);
        assert_eq!(telemetry.stats_resets, 0);
        assert_eq!(totals.total_sent, 500);
    }

    // ut_create_stats_enforces_cap
    #[test]
    fn ut_create_stats_enforces_cap() {
        let mut stats = FxHashMap::default();
        let mut telemetry = Telemetry::default();

        let first = key_of(&make_conn(1000, 0));
        let second = key_of(&make_conn(2000, 0));

        create_stats_for_key(&mut stats, &mut telemetry, 1, &first);
        create_stats_for_key(&mut stats, &mut telemetry, 1, &second);
        assert_eq!(stats.len(), 1);
        assert_eq!(telemetry.conn_dropped, 1);

        // re-touching a tracked key never counts as a drop
        create_stats_for_key(&mut stats, &mut telemetry, 1, &first);
        assert_eq!(telemetry.conn_dropped, 1);
    }

    // ut_update_without_baseline_reports_monotonic
    #[test]
    fn ut_update_without_baseline_reports_monotonic() {
        let mut stats = FxHashMap::default();
        let mut telemetry = Telemetry::default();
        let mut conn = make_conn(1000, 900);
        conn.monotonic_recv_bytes = 100;

        update_conn_with_stats(&mut stats, &mut telemetry, &key_of(&conn), &mut conn);
        assert_eq!(conn.last_sent_bytes, 900);
        assert_eq!(conn.last_recv_bytes, 100);
    }

    // ut_conns_by_key_last_record_wins
    #[test]
    fn ut_conns_by_key_last_record_wins() {
        let conns = vec![make_conn(1000, 1), make_conn(1000, 2)];
        let mut scratch = [0u8; CONNECTION_BYTE_KEY_MAX_LEN];

        let by_key = conns_by_key(&conns, &mut scratch);
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[&key_of(&conns[0])], 1);
    }
}
