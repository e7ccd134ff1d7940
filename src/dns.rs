// Per-flow DNS statistics as delivered by the DNS pipeline and buffered
// per client between polls. The tracker never parses DNS itself; it only
// merges and caps what the pipeline hands it.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::model::ConnectionType;

/// The rcode value of a DNS reply that carries no error.
pub const DNS_RESPONSE_CODE_NO_ERROR: u32 = 0;

/// Identity of the socket pair a DNS exchange was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DnsKey {
    pub client_ip: IpAddr,
    pub server_ip: IpAddr,
    pub client_port: u16,
    pub protocol: ConnectionType,
}

/// DNS query type as carried on the wire (A = 1, AAAA = 28, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryType(pub u16);

impl QueryType {
    pub const A: QueryType = QueryType(1);
    pub const CNAME: QueryType = QueryType(5);
    pub const PTR: QueryType = QueryType(12);
    pub const MX: QueryType = QueryType(15);
    pub const TXT: QueryType = QueryType(16);
    pub const AAAA: QueryType = QueryType(28);
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::A => write!(f, "A"),
            Self::CNAME => write!(f, "CNAME"),
            Self::PTR => write!(f, "PTR"),
            Self::MX => write!(f, "MX"),
            Self::TXT => write!(f, "TXT"),
            Self::AAAA => write!(f, "AAAA"),
            QueryType(n) => write!(f, "TYPE({n})"),
        }
    }
}

/// Aggregated outcome counters for one (key, domain, qtype) leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsStats {
    pub timeouts: u32,
    pub success_latency_sum: u64,
    pub failure_latency_sum: u64,
    pub count_by_rcode: HashMap<u32, u32>,
}

impl DnsStats {
    /// Field-wise accumulate another leaf into this one.
    pub fn merge_from(&mut self, other: &DnsStats) {
        self.timeouts += other.timeouts;
        self.success_latency_sum += other.success_latency_sum;
        self.failure_latency_sum += other.failure_latency_sum;
        for (rcode, count) in &other.count_by_rcode {
            *self.count_by_rcode.entry(*rcode).or_insert(0) += count;
        }
    }
}

/// Leaves of the per-client DNS buffer, keyed by domain then query type.
pub type DnsStatsByDomainByQtype = HashMap<String, HashMap<QueryType, DnsStats>>;

/// The full three-level map the DNS pipeline produces per interval.
pub type DnsStatsByKeyByDomainByQtype = HashMap<DnsKey, DnsStatsByDomainByQtype>;

/// Total leaf count across all three levels; the unit the per-client DNS cap
/// is expressed in.
pub fn deep_stats_count(stats: &DnsStatsByKeyByDomainByQtype) -> usize {
    let mut count = 0;
    for by_domain in stats.values() {
        for by_qtype in by_domain.values() {
            count += by_qtype.len();
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_key(port: u16) -> DnsKey {
        DnsKey {
            client_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            server_ip: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            client_port: port,
            protocol: ConnectionType::Udp,
        }
    }

    fn make_stats(timeouts: u32, rcode: u32, count: u32) -> DnsStats {
        DnsStats {
            timeouts,
            success_latency_sum: 100,
            failure_latency_sum: 20,
            count_by_rcode: HashMap::from([(rcode, count)]),
        }
    }

    // ut_dns_merge_adds_fields
    #[test]
    fn ut_dns_merge_adds_fields() {
        let mut a = make_stats(1, DNS_RESPONSE_CODE_NO_ERROR, 5);
        let b = make_stats(2, DNS_RESPONSE_CODE_NO_ERROR, 3);
        a.merge_from(&b);

        assert_eq!(a.timeouts, 3);
        assert_eq!(a.success_latency_sum, 200);
        assert_eq!(a.failure_latency_sum, 40);
        assert_eq!(a.count_by_rcode[&DNS_RESPONSE_CODE_NO_ERROR], 8);
    }

    // ut_dns_merge_new_rcode: unseen rcodes get their own bucket
    #[test]
    fn ut_dns_merge_new_rcode() {
        let mut a = make_stats(0, DNS_RESPONSE_CODE_NO_ERROR, 5);
        let b = make_stats(0, 3, 2); // NXDOMAIN
        a.merge_from(&b);

        assert_eq!(a.count_by_rcode[&DNS_RESPONSE_CODE_NO_ERROR], 5);
        assert_eq!(a.count_by_rcode[&3], 2);
    }

    // ut_deep_stats_count: counts leaves, not intermediate maps
    #[test]
    fn ut_deep_stats_count() {
        let mut stats = DnsStatsByKeyByDomainByQtype::new();
        let mut by_domain = DnsStatsByDomainByQtype::new();
        by_domain.insert(
            "example.com".to_string(),
            HashMap::from([
                (QueryType::A, DnsStats::default()),
                (QueryType::AAAA, DnsStats::default()),
            ]),
        );
        by_domain.insert(
            "example.org".to_string(),
            HashMap::from([(QueryType::A, DnsStats::default())]),
        );
        stats.insert(make_key(4000), by_domain);
        stats.insert(make_key(4001), DnsStatsByDomainByQtype::new());

        assert_eq!(deep_stats_count(&stats), 3);
    }
}
