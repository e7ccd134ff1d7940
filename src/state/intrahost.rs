// Intra-host classification: a connection is local when its remote endpoint,
// after undoing any NAT, is itself a local endpoint in the same delta.

use std::collections::HashSet;
use std::net::IpAddr;

use crate::model::{ConnectionStats, ConnectionType, Direction};

type EndpointKey = (IpAddr, u16, ConnectionType);

fn local_key(conn: &ConnectionStats) -> EndpointKey {
    (conn.source, conn.sport, conn.conn_type)
}

fn remote_key(conn: &ConnectionStats) -> EndpointKey {
    match conn.ip_translation {
        Some(xlat) => (xlat.repl_src_ip, xlat.repl_src_port, conn.conn_type),
        None => (conn.dest, conn.dport, conn.conn_type),
    }
}

/// Label every connection in the delta as intra-host or not, and strip the
/// NAT translation from incoming local connections.
pub(crate) fn classify_intra_host(conns: &mut [ConnectionStats]) {
    let mut local_endpoints: HashSet<EndpointKey> = HashSet::with_capacity(conns.len());
    for conn in conns.iter() {
        local_endpoints.insert(local_key(conn));
    }

    for conn in conns.iter_mut() {
        if conn.source == conn.dest
            || (conn.source.is_loopback() && conn.dest.is_loopback())
            || conn
                .ip_translation
                .is_some_and(|xlat| xlat.repl_src_ip.is_loopback())
        {
            conn.intra_host = true;
        } else {
            conn.intra_host = local_endpoints.contains(&remote_key(conn));
        }

        if conn.intra_host && conn.direction == Direction::Incoming {
            // The conntrack cache maps origin and reply onto both directions
            // of a local DNAT, so the incoming side carries a translation
            // even though nothing SNAT'd it. Drop it.
            conn.ip_translation = None;
        }
    }
}
