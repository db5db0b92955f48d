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

//! The [`Manager`] interface: what scopes need from their owner.
//!
//! Scopes do not own sockets, server lists, or a clock. Everything of
//! the kind is reached through a [`Manager`], which the daemon
//! implements over real sockets and tests implement with a fake.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::RawFd;
use std::time::Instant;

use crate::packet::Packet;
use crate::protocol::Family;

/// One of the shared UDP sockets owned by the manager.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SocketKind {
    DnsIpv4,
    DnsIpv6,
    LlmnrIpv4,
    LlmnrIpv6,
}

impl SocketKind {
    /// The classic DNS socket for the family of `address`.
    pub fn dns(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => Self::DnsIpv4,
            IpAddr::V6(_) => Self::DnsIpv6,
        }
    }

    /// The LLMNR socket for `family`, which must be concrete.
    pub fn llmnr(family: Family) -> Option<Self> {
        match family {
            Family::V4 => Some(Self::LlmnrIpv4),
            Family::V6 => Some(Self::LlmnrIpv6),
            Family::Any => None,
        }
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::DnsIpv4 => "DNS/IPv4",
            Self::DnsIpv6 => "DNS/IPv6",
            Self::LlmnrIpv4 => "LLMNR/IPv4",
            Self::LlmnrIpv6 => "LLMNR/IPv6",
        })
    }
}

/// A network link a scope is bound to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Link {
    pub ifindex: u32,
    pub name: String,
    pub mtu: u32,
}

/// A configured classic DNS server.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DnsServer {
    pub address: IpAddr,
}

impl DnsServer {
    pub fn family(&self) -> Family {
        Family::of(&self.address)
    }
}

/// The services a scope uses from its owner.
///
/// Server lookups take the scope's link ifindex, or `None` for the
/// global server list.
pub trait Manager {
    /// The current time. Scopes never read the clock themselves.
    fn now(&self) -> Instant;

    /// The server currently in use for `ifindex`.
    fn dns_server(&self, ifindex: Option<u32>) -> Option<DnsServer>;

    /// Switches to the next server for `ifindex`.
    fn next_dns_server(&self, ifindex: Option<u32>);

    /// Returns whether `address` is a configured server for `ifindex`.
    fn find_dns_server(&self, ifindex: Option<u32>, address: &IpAddr) -> bool;

    /// The MTU to assume for scopes that are not bound to a link.
    fn global_mtu(&self) -> u32;

    /// The file descriptor of a shared socket, opening it if needed.
    fn socket(&self, kind: SocketKind) -> io::Result<RawFd>;

    /// Sends `packet` to `dest` on socket `kind`, out of interface
    /// `ifindex` (0 for any).
    fn send(&self, kind: SocketKind, ifindex: u32, dest: SocketAddr, packet: &Packet) -> io::Result<()>;

    /// Returns whether `packet` was sent by this host.
    fn is_our_packet(&self, packet: &Packet) -> bool;
}
