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

//! Test doubles shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;

use crate::manager::{DnsServer, Link, Manager, SocketKind};
use crate::packet::Packet;

lazy_static! {
    static ref EPOCH: Instant = Instant::now();
}

/// Returns a link named after its index, with an Ethernet MTU.
pub fn link(ifindex: u32) -> Link {
    Link {
        ifindex,
        name: format!("eth{ifindex}"),
        mtu: 1500,
    }
}

/// A packet handed to [`FakeManager::send`].
#[derive(Clone, Debug)]
pub struct Sent {
    pub kind: SocketKind,
    pub ifindex: u32,
    pub dest: SocketAddr,
    pub packet: Packet,
}

/// A [`Manager`] that records what it is asked to send instead of
/// sending it. It has no sockets unless given some, and its clock only
/// moves when told to.
pub struct FakeManager {
    now: Cell<Instant>,
    servers: RefCell<HashMap<Option<u32>, (Vec<IpAddr>, usize)>>,
    global_mtu: Cell<u32>,
    our_addresses: RefCell<HashSet<IpAddr>>,
    socket_requests: RefCell<Vec<SocketKind>>,
    sockets: RefCell<HashMap<SocketKind, UdpSocket>>,
    sent: RefCell<Vec<Sent>>,
}

impl FakeManager {
    pub fn new() -> Self {
        Self {
            now: Cell::new(*EPOCH),
            servers: RefCell::new(HashMap::new()),
            global_mtu: Cell::new(1500),
            our_addresses: RefCell::new(HashSet::new()),
            socket_requests: RefCell::new(Vec::new()),
            sockets: RefCell::new(HashMap::new()),
            sent: RefCell::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn add_dns_server(&self, ifindex: Option<u32>, address: IpAddr) {
        self.servers
            .borrow_mut()
            .entry(ifindex)
            .or_default()
            .0
            .push(address);
    }

    pub fn set_global_mtu(&self, mtu: u32) {
        self.global_mtu.set(mtu);
    }

    /// Makes packets from `address` count as our own.
    pub fn add_our_address(&self, address: IpAddr) {
        self.our_addresses.borrow_mut().insert(address);
    }

    /// Hands out `socket` for `kind` from now on.
    pub fn set_socket(&self, kind: SocketKind, socket: UdpSocket) {
        self.sockets.borrow_mut().insert(kind, socket);
    }

    pub fn socket_requests(&self) -> Vec<SocketKind> {
        self.socket_requests.borrow().clone()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.borrow().clone()
    }
}

impl Manager for FakeManager {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn dns_server(&self, ifindex: Option<u32>) -> Option<DnsServer> {
        let servers = self.servers.borrow();
        let (list, current) = servers.get(&ifindex)?;
        list.get(*current % list.len().max(1))
            .map(|&address| DnsServer { address })
    }

    fn next_dns_server(&self, ifindex: Option<u32>) {
        if let Some((_, current)) = self.servers.borrow_mut().get_mut(&ifindex) {
            *current += 1;
        }
    }

    fn find_dns_server(&self, ifindex: Option<u32>, address: &IpAddr) -> bool {
        self.servers
            .borrow()
            .get(&ifindex)
            .map_or(false, |(list, _)| list.contains(address))
    }

    fn global_mtu(&self) -> u32 {
        self.global_mtu.get()
    }

    fn socket(&self, kind: SocketKind) -> io::Result<RawFd> {
        self.socket_requests.borrow_mut().push(kind);
        self.sockets
            .borrow()
            .get(&kind)
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::ErrorKind::Unsupported.into())
    }

    fn send(&self, kind: SocketKind, ifindex: u32, dest: SocketAddr, packet: &Packet) -> io::Result<()> {
        self.sent.borrow_mut().push(Sent {
            kind,
            ifindex,
            dest,
            packet: packet.clone(),
        });
        Ok(())
    }

    fn is_our_packet(&self, packet: &Packet) -> bool {
        packet
            .info()
            .sender
            .map_or(false, |sender| self.our_addresses.borrow().contains(&sender.ip()))
    }
}
