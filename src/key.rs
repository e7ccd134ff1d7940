use std::net::IpAddr;

use crate::error::NetstateError;
use crate::model::{ConnectionStats, ConnectionType, Direction};

/// Maximum encoded size of a connection byte key.
///
/// Layout: `[packed: 8][family|type: 1][source: 4|16][dest: 4|16]`:
///
/// - `packed` is a little-endian u64 holding
///   `direction << 32 | sport << 16 | dport`.
/// - the family/type byte holds `src_is_v6 << 5 | dest_is_v6 << 4 | type`.
/// - address octets follow, 4 bytes for IPv4 and 16 for IPv6.
///
/// Two v6 addresses yield the maximum of 8 + 1 + 16 + 16 = 41 bytes.
pub const CONNECTION_BYTE_KEY_MAX_LEN: usize = 41;

const PACKED_LEN: usize = 8;
const HEADER_LEN: usize = PACKED_LEN + 1;

/// Opaque canonical encoding of a connection's identity, suitable as a hash
/// map key. Distinct identities always produce distinct keys: the family/type
/// byte disambiguates address lengths, so the zero padding past `len` never
/// collides across layouts.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteKey {
    len: u8,
    buf: [u8; CONNECTION_BYTE_KEY_MAX_LEN],
}

/// A byte key decoded back into its identity fields, for debug output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedKey {
    pub source: IpAddr,
    pub sport: u16,
    pub dest: IpAddr,
    pub dport: u16,
    pub conn_type: ConnectionType,
    pub direction: Direction,
}

impl ByteKey {
    fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; CONNECTION_BYTE_KEY_MAX_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self {
            len: bytes.len() as u8,
            buf,
        }
    }

    /// The encoded prefix.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    /// Reverse the fixed layout back into identity fields.
    pub fn decode(&self) -> Result<DecodedKey, NetstateError> {
        let bytes = self.as_bytes();
        let malformed = || NetstateError::MalformedKey { len: bytes.len() };

        if bytes.len() < HEADER_LEN {
            return Err(malformed());
        }

        let packed = u64::from_le_bytes(bytes[..PACKED_LEN].try_into().expect("8-byte prefix"));
        let dport = (packed & 0xFFFF) as u16;
        let sport = ((packed >> 16) & 0xFFFF) as u16;
        let direction = match (packed >> 32) & 0xFF {
            0 => Direction::Unknown,
            1 => Direction::Incoming,
            2 => Direction::Outgoing,
            _ => return Err(malformed()),
        };

        let meta = bytes[PACKED_LEN];
        let src_len = if meta & 0b0010_0000 != 0 { 16 } else { 4 };
        let dest_len = if meta & 0b0001_0000 != 0 { 16 } else { 4 };
        let conn_type = if meta & 0b0000_0001 != 0 {
            ConnectionType::Udp
        } else {
            ConnectionType::Tcp
        };

        if bytes.len() != HEADER_LEN + src_len + dest_len {
            return Err(malformed());
        }

        let source = ip_from_octets(&bytes[HEADER_LEN..HEADER_LEN + src_len]).ok_or_else(malformed)?;
        let dest = ip_from_octets(&bytes[HEADER_LEN + src_len..]).ok_or_else(malformed)?;

        Ok(DecodedKey {
            source,
            sport,
            dest,
            dport,
            conn_type,
            direction,
        })
    }
}

impl std::fmt::Display for ByteKey {
    /// Human-readable form used by state dumps, e.g.
    /// `tcp outgoing 10.0.0.1:5000 -> 10.0.0.2:80`. Falls back to hex if the
    /// key does not decode.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.decode() {
            Ok(k) => write!(
                f,
                "{} {} {}:{} -> {}:{}",
                k.conn_type, k.direction, k.source, k.sport, k.dest, k.dport,
            ),
            Err(_) => {
                for b in self.as_bytes() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ByteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteKey({self})")
    }
}

fn ip_from_octets(octets: &[u8]) -> Option<IpAddr> {
    match octets.len() {
        4 => {
            let o: [u8; 4] = octets.try_into().ok()?;
            Some(IpAddr::from(o))
        }
        16 => {
            let o: [u8; 16] = octets.try_into().ok()?;
            Some(IpAddr::from(o))
        }
        _ => None,
    }
}

fn ip_octets_len(ip: &IpAddr) -> usize {
    match ip {
        IpAddr::V4(_) => 4,
        IpAddr::V6(_) => 16,
    }
}

fn write_ip(buf: &mut [u8], ip: &IpAddr) -> usize {
    match ip {
        IpAddr::V4(v4) => {
            buf[..4].copy_from_slice(&v4.octets());
            4
        }
        IpAddr::V6(v6) => {
            buf[..16].copy_from_slice(&v6.octets());
            16
        }
    }
}

impl ConnectionStats {
    /// Pack this connection's identity into `scratch` and return the owning
    /// key. Deterministic and collision-free across distinct identities.
    ///
    /// Fails only when `scratch` is shorter than the encoding needs; callers
    /// skip such records and keep going.
    pub fn byte_key(&self, scratch: &mut [u8]) -> Result<ByteKey, NetstateError> {
        let needed = HEADER_LEN + ip_octets_len(&self.source) + ip_octets_len(&self.dest);
        if scratch.len() < needed {
            return Err(NetstateError::KeyBufferTooSmall {
                needed,
                available: scratch.len(),
            });
        }

        let packed = (self.direction as u64) << 32 | (self.sport as u64) << 16 | self.dport as u64;
        scratch[..PACKED_LEN].copy_from_slice(&packed.to_le_bytes());

        let src_v6 = u8::from(matches!(self.source, IpAddr::V6(_)));
        let dest_v6 = u8::from(matches!(self.dest, IpAddr::V6(_)));
        scratch[PACKED_LEN] = src_v6 << 5 | dest_v6 << 4 | self.conn_type as u8;

        let mut n = HEADER_LEN;
        n += write_ip(&mut scratch[n..], &self.source);
        n += write_ip(&mut scratch[n..], &self.dest);

        Ok(ByteKey::from_slice(&scratch[..n]))
    }
}
