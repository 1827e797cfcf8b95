use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

/// The reliability class of a channel, and of the socket multiplexer that owns it
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Reliability {
    /// strictly ordered, gapless, exactly-once delivery
    Reliable,
    /// bounded loss: gaps up to a configured fraction of the window are skipped
    PartialReliable,
}

impl Reliability {
    pub fn is_reliable(&self) -> bool {
        matches!(self, Reliability::Reliable)
    }
}

/// The identity of a peer as seen by one socket multiplexer.
///
/// NB: Equality and hashing are based on IP address and port only. The reliability flag is
///      carried along for information, but two connections to the same peer address are the same
///      connection regardless of it.
#[derive(Copy, Clone, Debug)]
pub struct Connection {
    pub ip: IpAddr,
    pub port: u16,
    pub reliability: Reliability,
}

impl Connection {
    pub fn new(addr: SocketAddr, reliability: Reliability) -> Connection {
        Connection {
            ip: addr.ip(),
            port: addr.port(),
            reliability,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}
impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr())
    }
}
