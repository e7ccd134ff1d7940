use std::net::{IpAddr, Ipv4Addr};

use serde::Serialize;

/// Transport protocol of a tracked connection.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Tcp,
    Udp,
}

/// Direction of a connection relative to this host, as reported by the probe.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Unknown,
    Incoming,
    Outgoing,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Incoming => write!(f, "incoming"),
            Self::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// NAT mapping attached to a connection by the conntrack reader.
///
/// `repl_src_ip`/`repl_src_port` are the source of the reply tuple, i.e. the
/// address the remote peer is actually talking to after translation.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
pub struct IpTranslation {
    pub repl_src_ip: IpAddr,
    pub repl_src_port: u16,
}

/// One observed flow: identity, monotonic counters from the probe, and the
/// last-interval counters derived by the state tracker.
///
/// Plain value type. The monotonic counters are cumulative since the probe
/// first saw the flow; the `last_*` counters are rewritten on every delta and
/// carry the growth since the owning client's previous poll.
#[derive(Clone, Copy, Serialize, Debug, PartialEq)]
pub struct ConnectionStats {
    pub source: IpAddr,
    pub sport: u16,
    pub dest: IpAddr,
    pub dport: u16,
    pub conn_type: ConnectionType,
    pub direction: Direction,
    pub ip_translation: Option<IpTranslation>,

    pub monotonic_sent_bytes: u64,
    pub monotonic_recv_bytes: u64,
    pub monotonic_sent_packets: u64,
    pub monotonic_recv_packets: u64,
    pub monotonic_retransmits: u32,
    pub monotonic_tcp_established: u32,
    pub monotonic_tcp_closed: u32,

    pub last_sent_bytes: u64,
    pub last_recv_bytes: u64,
    pub last_sent_packets: u64,
    pub last_recv_packets: u64,
    pub last_retransmits: u32,
    pub last_tcp_established: u32,
    pub last_tcp_closed: u32,

    /// Monotonic nanosecond timestamp assigned by the producer to its most
    /// recent observation of this flow. Used to order closed vs. active
    /// records bearing the same key.
    pub last_update_epoch: u64,

    /// Set by the intra-host classifier on outgoing deltas.
    pub intra_host: bool,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self {
            source: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            sport: 0,
            dest: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dport: 0,
            conn_type: ConnectionType::Tcp,
            direction: Direction::Unknown,
            ip_translation: None,
            monotonic_sent_bytes: 0,
            monotonic_recv_bytes: 0,
            monotonic_sent_packets: 0,
            monotonic_recv_packets: 0,
            monotonic_retransmits: 0,
            monotonic_tcp_established: 0,
            monotonic_tcp_closed: 0,
            last_sent_bytes: 0,
            last_recv_bytes: 0,
            last_sent_packets: 0,
            last_recv_packets: 0,
            last_retransmits: 0,
            last_tcp_established: 0,
            last_tcp_closed: 0,
            last_update_epoch: 0,
            intra_host: false,
        }
    }
}

impl ConnectionStats {
    /// Fold another observation of the same flow into this one.
    ///
    /// Monotonic counters are summed, the larger epoch wins, and a missing
    /// NAT translation is inherited from the other record. Used both to
    /// coalesce repeated closed reports and to combine a closed record with
    /// the reopened active flow that shares its key.
    pub fn merge_from(&mut self, other: &ConnectionStats) {
        self.monotonic_sent_bytes += other.monotonic_sent_bytes;
        self.monotonic_recv_bytes += other.monotonic_recv_bytes;
        self.monotonic_sent_packets += other.monotonic_sent_packets;
        self.monotonic_recv_packets += other.monotonic_recv_packets;
        self.monotonic_retransmits += other.monotonic_retransmits;
        self.monotonic_tcp_established += other.monotonic_tcp_established;
        self.monotonic_tcp_closed += other.monotonic_tcp_closed;

        if other.last_update_epoch > self.last_update_epoch {
            self.last_update_epoch = other.last_update_epoch;
        }

        if self.ip_translation.is_none() {
            self.ip_translation = other.ip_translation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_conn(sent: u64, recv: u64, epoch: u64) -> ConnectionStats {
        ConnectionStats {
            source: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            sport: 1234,
            dest: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            dport: 80,
            monotonic_sent_bytes: sent,
            monotonic_recv_bytes: recv,
            last_update_epoch: epoch,
            ..Default::default()
        }
    }

    // ut_merge_sums_counters: monotonic counters add up
    #[test]
    fn ut_merge_sums_counters() {
        let mut a = make_conn(100, 50, 5);
        a.monotonic_retransmits = 2;
        let mut b = make_conn(250, 10, 7);
        b.monotonic_retransmits = 1;
        b.monotonic_tcp_closed = 1;

        a.merge_from(&b);
        assert_eq!(a.monotonic_sent_bytes, 350);
        assert_eq!(a.monotonic_recv_bytes, 60);
        assert_eq!(a.monotonic_retransmits, 3);
        assert_eq!(a.monotonic_tcp_closed, 1);
    }

    // ut_merge_keeps_larger_epoch
    #[test]
    fn ut_merge_keeps_larger_epoch() {
        let mut a = make_conn(0, 0, 9);
        let b = make_conn(0, 0, 7);
        a.merge_from(&b);
        assert_eq!(a.last_update_epoch, 9);

        let mut c = make_conn(0, 0, 3);
        let d = make_conn(0, 0, 8);
        c.merge_from(&d);
        assert_eq!(c.last_update_epoch, 8);
    }

    // ut_merge_inherits_translation: only fills a missing translation
    #[test]
    fn ut_merge_inherits_translation() {
        let xlat = IpTranslation {
            repl_src_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 0, 9)),
            repl_src_port: 8080,
        };

        let mut a = make_conn(0, 0, 0);
        let mut b = make_conn(0, 0, 0);
        b.ip_translation = Some(xlat);
        a.merge_from(&b);
        assert_eq!(a.ip_translation, Some(xlat));

        let other = IpTranslation {
            repl_src_ip: IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)),
            repl_src_port: 9090,
        };
        let mut c = make_conn(0, 0, 0);
        c.ip_translation = Some(xlat);
        let mut d = make_conn(0, 0, 0);
        d.ip_translation = Some(other);
        c.merge_from(&d);
        assert_eq!(c.ip_translation, Some(xlat));
    }
}
