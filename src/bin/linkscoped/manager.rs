// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements the [`Manager`] over real UDP sockets.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Instant;

use log::{debug, info};

use linkscope::manager::{DnsServer, Manager, SocketKind};
use linkscope::packet::{Packet, PacketInfo, Transport, MAX_MESSAGE_SIZE};
use linkscope::protocol::{Protocol, LLMNR_PORT};
use linkscope::socket::{UdpOptions, UdpSocket};

/// A rotating list of DNS servers.
#[derive(Debug, Default)]
struct ServerList {
    servers: Vec<IpAddr>,
    current: Cell<usize>,
}

impl ServerList {
    fn new(servers: Vec<IpAddr>) -> Self {
        Self {
            servers,
            current: Cell::new(0),
        }
    }

    fn current(&self) -> Option<IpAddr> {
        self.servers.get(self.current.get()).copied()
    }

    fn advance(&self) {
        if !self.servers.is_empty() {
            self.current.set((self.current.get() + 1) % self.servers.len());
        }
    }
}

/// The daemon's [`Manager`]: four shared UDP sockets, opened on first
/// use, and the configured server lists.
pub struct UdpManager {
    sockets: RefCell<HashMap<SocketKind, UdpSocket>>,
    global_servers: ServerList,
    link_servers: HashMap<u32, ServerList>,
    global_mtu: u32,
    local_addresses: HashSet<IpAddr>,
}

impl UdpManager {
    pub fn new(global_servers: Vec<IpAddr>, global_mtu: u32) -> Self {
        Self {
            sockets: RefCell::new(HashMap::new()),
            global_servers: ServerList::new(global_servers),
            link_servers: HashMap::new(),
            global_mtu,
            local_addresses: HashSet::new(),
        }
    }

    /// Registers the DNS servers and local addresses of a link.
    pub fn add_link(&mut self, ifindex: u32, servers: Vec<IpAddr>, addresses: &[IpAddr]) {
        self.link_servers.insert(ifindex, ServerList::new(servers));
        self.local_addresses.extend(addresses);
    }

    /// The sockets opened so far, for polling.
    pub fn open_sockets(&self) -> Vec<(SocketKind, RawFd)> {
        self.sockets
            .borrow()
            .iter()
            .map(|(&kind, socket)| (kind, socket.as_raw_fd()))
            .collect()
    }

    /// Receives the next datagram waiting on socket `kind`. Returns
    /// `None` once none is waiting. Datagrams too short to be DNS
    /// messages are dropped.
    pub fn receive(&self, kind: SocketKind) -> io::Result<Option<Packet>> {
        let mut buf = vec![0; MAX_MESSAGE_SIZE];
        loop {
            let datagram = match self.with_socket(kind, |socket| socket.recv(&mut buf)) {
                Ok(datagram) => datagram,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let info = PacketInfo {
                sender: Some(datagram.source),
                destination: datagram.destination,
                ifindex: datagram.ifindex,
                transport: Transport::Udp,
            };
            match Packet::from_octets(protocol_of(kind), buf[..datagram.len].to_vec(), info) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => debug!("Dropping datagram from {} on {}: {}.", datagram.source, kind, e),
            }
        }
    }

    fn with_socket<T>(
        &self,
        kind: SocketKind,
        f: impl FnOnce(&mut UdpSocket) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut sockets = self.sockets.borrow_mut();
        if !sockets.contains_key(&kind) {
            let socket = UdpSocket::bind(bind_address(kind), &socket_options(kind))?;
            info!("Opened {} socket.", kind);
            sockets.insert(kind, socket);
        }
        match sockets.get_mut(&kind) {
            Some(socket) => f(socket),
            None => Err(ErrorKind::NotFound.into()),
        }
    }
}

impl Manager for UdpManager {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn dns_server(&self, ifindex: Option<u32>) -> Option<DnsServer> {
        let list = match ifindex {
            Some(ifindex) => self.link_servers.get(&ifindex)?,
            None => &self.global_servers,
        };
        list.current().map(|address| DnsServer { address })
    }

    fn next_dns_server(&self, ifindex: Option<u32>) {
        match ifindex {
            Some(ifindex) => {
                if let Some(list) = self.link_servers.get(&ifindex) {
                    list.advance();
                }
            }
            None => self.global_servers.advance(),
        }
    }

    fn find_dns_server(&self, ifindex: Option<u32>, address: &IpAddr) -> bool {
        match ifindex {
            Some(ifindex) => self
                .link_servers
                .get(&ifindex)
                .map_or(false, |list| list.servers.contains(address)),
            None => self.global_servers.servers.contains(address),
        }
    }

    fn global_mtu(&self) -> u32 {
        self.global_mtu
    }

    fn socket(&self, kind: SocketKind) -> io::Result<RawFd> {
        self.with_socket(kind, |socket| Ok(socket.as_raw_fd()))
    }

    fn send(&self, kind: SocketKind, ifindex: u32, dest: SocketAddr, packet: &Packet) -> io::Result<()> {
        self.with_socket(kind, |socket| socket.send(packet.octets(), dest, ifindex))
            .map(|_| ())
    }

    fn is_our_packet(&self, packet: &Packet) -> bool {
        packet
            .info()
            .sender
            .map_or(false, |sender| self.local_addresses.contains(&sender.ip()))
    }
}

fn protocol_of(kind: SocketKind) -> Protocol {
    match kind {
        SocketKind::DnsIpv4 | SocketKind::DnsIpv6 => Protocol::Dns,
        SocketKind::LlmnrIpv4 | SocketKind::LlmnrIpv6 => Protocol::Llmnr,
    }
}

fn bind_address(kind: SocketKind) -> SocketAddr {
    let port = match protocol_of(kind) {
        Protocol::Llmnr => LLMNR_PORT,
        _ => 0,
    };
    match kind {
        SocketKind::DnsIpv4 | SocketKind::LlmnrIpv4 => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port),
        SocketKind::DnsIpv6 | SocketKind::LlmnrIpv6 => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port),
    }
}

fn socket_options(kind: SocketKind) -> UdpOptions {
    match protocol_of(kind) {
        Protocol::Llmnr => UdpOptions {
            reuse_address: true,
            packet_info: true,
            hop_limit: Some(1),
            multicast_loop: false,
            nonblocking: true,
        },
        _ => UdpOptions {
            nonblocking: true,
            ..UdpOptions::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servers_rotate_per_link() {
        let global: IpAddr = "192.0.2.53".parse().unwrap();
        let first: IpAddr = "198.51.100.1".parse().unwrap();
        let second: IpAddr = "198.51.100.2".parse().unwrap();
        let mut manager = UdpManager::new(vec![global], 1500);
        manager.add_link(2, vec![first, second], &[]);

        assert_eq!(manager.dns_server(None).unwrap().address, global);
        assert_eq!(manager.dns_server(Some(2)).unwrap().address, first);
        manager.next_dns_server(Some(2));
        assert_eq!(manager.dns_server(Some(2)).unwrap().address, second);
        manager.next_dns_server(Some(2));
        assert_eq!(manager.dns_server(Some(2)).unwrap().address, first);
        assert!(manager.dns_server(Some(3)).is_none());

        assert!(manager.find_dns_server(Some(2), &second));
        assert!(!manager.find_dns_server(None, &second));
    }

    #[test]
    fn packets_from_local_addresses_are_ours() {
        let mut manager = UdpManager::new(Vec::new(), 1500);
        manager.add_link(2, Vec::new(), &["169.254.10.1".parse().unwrap()]);
        let mut packet =
            Packet::from_octets(Protocol::Llmnr, vec![0; 12], PacketInfo::default()).unwrap();
        assert!(!manager.is_our_packet(&packet));
        packet.info_mut().sender = Some("169.254.10.1:5355".parse().unwrap());
        assert!(manager.is_our_packet(&packet));
    }
}
