//! Point-to-point datagram transport used by the connection session
//!
//! The session only relies on the `Transport` contract: open a handle to a
//! target, send bytes with a requested delivery mode, poll whatever has
//! arrived, and close the handle. Two implementations live here:
//! - `UdpTransport`: non-blocking UDP sockets, one per open handle
//! - `MemoryTransport`: an in-process network used for offline runs and tests

use crate::error::TransportError;
use log::{debug, warn};
use shared::{decode, encode, Envelope, ServerId, MAX_DATAGRAM_SIZE};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;

/// Where a connection attempt should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    Address(SocketAddr),
    /// Platform-routed server, resolved by the transport
    Server(ServerId),
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectTarget::Address(addr) => write!(f, "{}", addr),
            ConnectTarget::Server(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Reliable,
    Unreliable,
}

impl Delivery {
    pub fn from_reliable(reliable: bool) -> Self {
        if reliable {
            Delivery::Reliable
        } else {
            Delivery::Unreliable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: u32,
    /// Resolved remote address; datagrams from anywhere else are not ours
    pub peer: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub from: SocketAddr,
}

pub trait Transport {
    fn open(&mut self, target: &ConnectTarget) -> Result<ConnectionHandle, TransportError>;
    fn send(
        &mut self,
        handle: ConnectionHandle,
        bytes: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError>;
    /// Returns everything received so far without blocking
    fn poll_received(&mut self, handle: ConnectionHandle) -> Vec<Datagram>;
    fn close(&mut self, handle: ConnectionHandle);
}

/// UDP transport. Reliable delivery is best effort; the handshake retries
/// cover what matters for connection establishment.
pub struct UdpTransport {
    sockets: HashMap<u32, UdpSocket>,
    routes: HashMap<ServerId, SocketAddr>,
    next_handle: u32,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            routes: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Makes a platform-routed server reachable by its identity
    pub fn with_route(mut self, server: ServerId, addr: SocketAddr) -> Self {
        self.routes.insert(server, addr);
        self
    }

    fn resolve(&self, target: &ConnectTarget) -> Result<SocketAddr, TransportError> {
        match target {
            ConnectTarget::Address(addr) => Ok(*addr),
            ConnectTarget::Server(id) => self
                .routes
                .get(id)
                .copied()
                .ok_or_else(|| TransportError::Unroutable(id.to_string())),
        }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UdpTransport {
    fn open(&mut self, target: &ConnectTarget) -> Result<ConnectionHandle, TransportError> {
        let peer = self.resolve(target)?;
        let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        debug!("Opened socket {} for {}", socket.local_addr()?, peer);

        let id = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.sockets.insert(id, socket);

        Ok(ConnectionHandle { id, peer })
    }

    fn send(
        &mut self,
        handle: ConnectionHandle,
        bytes: &[u8],
        _delivery: Delivery,
    ) -> Result<(), TransportError> {
        let socket = self
            .sockets
            .get(&handle.id)
            .ok_or(TransportError::UnknownHandle(handle.id))?;
        socket.send_to(bytes, handle.peer)?;
        Ok(())
    }

    fn poll_received(&mut self, handle: ConnectionHandle) -> Vec<Datagram> {
        let mut received = Vec::new();
        let Some(socket) = self.sockets.get(&handle.id) else {
            return received;
        };

        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buffer) {
                Ok((len, from)) => received.push(Datagram {
                    bytes: buffer[..len].to_vec(),
                    from,
                }),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    // ICMP port-unreachable shows up here on some platforms
                    debug!("Receive error on handle {}: {}", handle.id, e);
                    break;
                }
            }
        }

        received
    }

    fn close(&mut self, handle: ConnectionHandle) {
        if self.sockets.remove(&handle.id).is_none() {
            warn!("Closing unknown connection handle {}", handle.id);
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentDatagram {
    pub handle: u32,
    pub peer: SocketAddr,
    pub bytes: Vec<u8>,
    pub delivery: Delivery,
}

#[derive(Debug, Default)]
struct MemoryNetwork {
    next_handle: u32,
    open: HashMap<u32, SocketAddr>,
    routes: HashMap<ServerId, SocketAddr>,
    inbound: Vec<Datagram>,
    sent: Vec<SentDatagram>,
    unreachable: bool,
}

/// In-process transport. Clones share one network, so a test or an offline
/// host can inject datagrams and inspect what the client sent.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    network: Rc<RefCell<MemoryNetwork>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_server(&self, server: ServerId, addr: SocketAddr) {
        self.network.borrow_mut().routes.insert(server, addr);
    }

    /// Makes every subsequent `open` fail
    pub fn set_unreachable(&self, unreachable: bool) {
        self.network.borrow_mut().unreachable = unreachable;
    }

    pub fn deliver(&self, from: SocketAddr, bytes: Vec<u8>) {
        self.network
            .borrow_mut()
            .inbound
            .push(Datagram { bytes, from });
    }

    pub fn deliver_envelope(&self, from: SocketAddr, envelope: &Envelope) {
        if let Ok(bytes) = encode(envelope) {
            self.deliver(from, bytes);
        }
    }

    pub fn open_count(&self) -> usize {
        self.network.borrow().open.len()
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.network.borrow().sent.clone()
    }

    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.network
            .borrow()
            .sent
            .iter()
            .filter_map(|d| decode(&d.bytes).ok())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.network.borrow_mut().sent.clear();
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, target: &ConnectTarget) -> Result<ConnectionHandle, TransportError> {
        let mut network = self.network.borrow_mut();
        if network.unreachable {
            return Err(TransportError::Unroutable(target.to_string()));
        }

        let peer = match target {
            ConnectTarget::Address(addr) => *addr,
            ConnectTarget::Server(id) => network
                .routes
                .get(id)
                .copied()
                .ok_or_else(|| TransportError::Unroutable(id.to_string()))?,
        };

        network.next_handle += 1;
        let id = network.next_handle;
        network.open.insert(id, peer);
        Ok(ConnectionHandle { id, peer })
    }

    fn send(
        &mut self,
        handle: ConnectionHandle,
        bytes: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        let mut network = self.network.borrow_mut();
        if !network.open.contains_key(&handle.id) {
            return Err(TransportError::UnknownHandle(handle.id));
        }
        network.sent.push(SentDatagram {
            handle: handle.id,
            peer: handle.peer,
            bytes: bytes.to_vec(),
            delivery,
        });
        Ok(())
    }

    fn poll_received(&mut self, handle: ConnectionHandle) -> Vec<Datagram> {
        let mut network = self.network.borrow_mut();
        if !network.open.contains_key(&handle.id) {
            return Vec::new();
        }
        std::mem::take(&mut network.inbound)
    }

    fn close(&mut self, handle: ConnectionHandle) {
        self.network.borrow_mut().open.remove(&handle.id);
    }
}
