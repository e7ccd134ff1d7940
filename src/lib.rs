// netstate — per-client network connection state tracking for a host-level
// observability agent.
//
// The probe feeds connection snapshots and closed-connection batches into a
// single registry; any number of polling consumers ("clients") each get a
// delta of what changed since their own previous poll, with last-interval
// counters derived from the probe's monotonic counters, coalesced closed
// connections, buffered DNS/HTTP stats, and intra-host labeling.

pub mod dns;
pub mod error;
pub mod http;
pub mod key;
pub mod model;
pub mod state;

pub use error::NetstateError;
pub use key::{ByteKey, CONNECTION_BYTE_KEY_MAX_LEN};
pub use model::{ConnectionStats, ConnectionType, Direction, IpTranslation};
pub use state::{Delta, NetworkState, StateConfig, Telemetry, DEBUG_CLIENT_ID};
