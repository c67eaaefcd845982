use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::DatagramTransport;

/// Default group: the IPv6 interface-local all-nodes address.
pub const DEFAULT_GROUP: IpAddr = IpAddr::V6(Ipv6Addr::new(0xff01, 0, 0, 0, 0, 0, 0, 1));

/// Default well-known bus port.
pub const DEFAULT_PORT: u16 = 26000;

/// Default maximum datagram size: 32 KiB.
pub const DEFAULT_MAX_DATAGRAM: usize = 32 * 1024;

const SOCKET_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

// Caps absurd timeouts so deadline arithmetic cannot overflow `Instant`.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Multicast group membership settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastConfig {
    /// Group address. IPv4 or IPv6, must be a multicast address.
    pub group: IpAddr,
    /// Port every participant binds and sends to.
    pub port: u16,
    /// Outgoing interface for IPv4 groups. `UNSPECIFIED` lets the OS choose.
    pub interface_v4: Ipv4Addr,
    /// Interface index for IPv6 groups. `0` lets the OS choose.
    pub interface_index: u32,
    /// Multicast TTL (IPv4) or hop limit (IPv6).
    pub hops: u32,
    /// Deliver our own datagrams back to sockets on this host.
    pub loopback: bool,
    /// Receive buffer size and upper bound for sent datagrams.
    pub max_datagram_size: usize,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            interface_v4: Ipv4Addr::UNSPECIFIED,
            interface_index: 0,
            hops: 1,
            loopback: true,
            max_datagram_size: DEFAULT_MAX_DATAGRAM,
        }
    }
}

impl MulticastConfig {
    /// The address datagrams are sent to.
    pub fn destination(&self) -> SocketAddr {
        match self.group {
            IpAddr::V4(group) => SocketAddr::V4(SocketAddrV4::new(group, self.port)),
            IpAddr::V6(group) => {
                SocketAddr::V6(SocketAddrV6::new(group, self.port, 0, self.interface_index))
            }
        }
    }
}

/// One UDP socket joined to a multicast group, used for both send and receive.
///
/// The receive wait multiplexes the socket with a [`Waker`], so [`close`] from any
/// thread interrupts a blocked [`recv_timeout`] immediately instead of relying on the
/// socket being closed underneath it.
///
/// [`close`]: DatagramTransport::close
/// [`recv_timeout`]: DatagramTransport::recv_timeout
pub struct MulticastSocket {
    socket: RwLock<Option<UdpSocket>>,
    poller: Mutex<Poller>,
    registry: Registry,
    waker: Waker,
    destination: SocketAddr,
    closed: AtomicBool,
    max_datagram_size: usize,
}

struct Poller {
    poll: Poll,
    events: Events,
    buf: Vec<u8>,
}

impl MulticastSocket {
    /// Bind the well-known port and join the configured group.
    pub fn bind(config: MulticastConfig) -> Result<Self> {
        if !config.group.is_multicast() {
            return Err(TransportError::NotMulticast(config.group));
        }

        let (domain, bind_addr) = match config.group {
            IpAddr::V4(_) => (
                Domain::IPV4,
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port),
            ),
            IpAddr::V6(_) => (
                Domain::IPV6,
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), config.port),
            ),
        };

        // Every client on the host binds the same port, so address reuse is required.
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        if domain == Domain::IPV6 {
            socket.set_only_v6(true)?;
        }
        socket
            .bind(&bind_addr.into())
            .map_err(|source| TransportError::Bind {
                addr: bind_addr,
                source,
            })?;

        join_group(&socket, &config)?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let mut socket = UdpSocket::from_std(std_socket);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let registry = poll.registry().try_clone()?;

        let destination = config.destination();
        info!(group = %destination, "joined multicast group");

        Ok(Self {
            socket: RwLock::new(Some(socket)),
            poller: Mutex::new(Poller {
                poll,
                events: Events::with_capacity(8),
                // One spare byte reveals datagrams longer than the limit.
                buf: vec![0u8; config.max_datagram_size + 1],
            }),
            registry,
            waker,
            destination,
            closed: AtomicBool::new(false),
            max_datagram_size: config.max_datagram_size,
        })
    }

    /// The group address and port datagrams are sent to.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or(TransportError::Shutdown)?;
        Ok(socket.local_addr()?)
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<Option<Bytes>> {
        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or(TransportError::Shutdown)?;
        loop {
            match socket.recv_from(buf) {
                Ok((len, src)) if len > self.max_datagram_size => {
                    debug!(len, %src, max = self.max_datagram_size, "dropping oversized datagram");
                }
                Ok((len, src)) => {
                    debug!(len, %src, "datagram received");
                    return Ok(Some(Bytes::copy_from_slice(&buf[..len])));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

fn join_group(socket: &Socket, config: &MulticastConfig) -> Result<()> {
    let join_err = |source| TransportError::Join {
        group: config.group,
        source,
    };
    match config.group {
        IpAddr::V4(group) => {
            socket
                .join_multicast_v4(&group, &config.interface_v4)
                .map_err(join_err)?;
            if !config.interface_v4.is_unspecified() {
                socket.set_multicast_if_v4(&config.interface_v4)?;
            }
            socket.set_multicast_ttl_v4(config.hops)?;
            socket.set_multicast_loop_v4(config.loopback)?;
        }
        IpAddr::V6(group) => {
            socket
                .join_multicast_v6(&group, config.interface_index)
                .map_err(join_err)?;
            if config.interface_index != 0 {
                socket.set_multicast_if_v6(config.interface_index)?;
            }
            socket.set_multicast_hops_v6(config.hops)?;
            socket.set_multicast_loop_v6(config.loopback)?;
        }
    }
    Ok(())
}

impl DatagramTransport for MulticastSocket {
    fn send(&self, datagram: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }
        if datagram.len() > self.max_datagram_size {
            return Err(TransportError::DatagramTooLarge {
                size: datagram.len(),
                max: self.max_datagram_size,
            });
        }

        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or(TransportError::Shutdown)?;
        loop {
            match socket.send_to(datagram, self.destination) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = Instant::now() + timeout.min(MAX_WAIT);
        let mut poller = self.poller.lock();
        let Poller { poll, events, buf } = &mut *poller;

        loop {
            if self.is_closed() {
                return Err(TransportError::Shutdown);
            }
            // Drain before waiting: readiness is edge-triggered.
            if let Some(datagram) = self.try_recv(buf)? {
                return Ok(Some(datagram));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match poll.poll(events, Some(remaining)) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.waker.wake() {
            debug!(error = %err, "failed to wake receive wait");
        }
        if let Some(mut socket) = self.socket.write().take() {
            if let Err(err) = self.registry.deregister(&mut socket) {
                debug!(error = %err, "failed to deregister multicast socket");
            }
        }
        info!(group = %self.destination, "multicast socket closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }
}

impl std::fmt::Debug for MulticastSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastSocket")
            .field("destination", &self.destination)
            .field("closed", &self.is_closed())
            .finish()
    }
}
