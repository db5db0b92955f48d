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

//! Sending packets from a scope.
//!
//! Classic DNS packets go to the scope's current server over unicast
//! UDP, and must fit in both a 512-octet datagram and the link MTU.
//! LLMNR packets go to the multicast group of the scope's family and
//! are subject to the scope's rate limit. Oversized DNS queries are the
//! caller's cue to fall back to TCP via [`Scope::tcp_socket`].

use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpStream};

use super::{Error, Scope};
use crate::manager::{DnsServer, Manager, SocketKind};
use crate::packet::Packet;
use crate::protocol::{Protocol, DNS_PACKET_UNICAST_SIZE_MAX, DNS_PORT, LLMNR_PORT};
use crate::socket;

impl Scope {
    /// Sends `packet` using the scope's protocol.
    pub fn emit(&mut self, manager: &dyn Manager, packet: &Packet) -> Result<(), Error> {
        if packet.protocol() != self.protocol {
            return Err(Error::ProtocolMismatch);
        }

        match self.protocol {
            Protocol::Dns => {
                if packet.qdcount() > 1 {
                    return Err(Error::NotSupported);
                }
                let server = self.dns_server(manager).ok_or(Error::NoServer)?;
                if packet.size() > DNS_PACKET_UNICAST_SIZE_MAX || packet.size() > self.mtu(manager) {
                    return Err(Error::MessageTooLarge);
                }
                manager.send(
                    SocketKind::dns(&server.address),
                    self.ifindex().unwrap_or(0),
                    SocketAddr::new(server.address, DNS_PORT),
                    packet,
                )?;
            }

            Protocol::Llmnr => {
                if packet.qdcount() > 1 {
                    return Err(Error::NotSupported);
                }
                if !self.ratelimit.test(manager.now()) {
                    return Err(Error::RateLimited);
                }
                let (Some(kind), Some(group)) = (
                    SocketKind::llmnr(self.family),
                    self.family.llmnr_group(),
                ) else {
                    return Err(Error::AddressFamilyNotSupported);
                };
                manager.send(
                    kind,
                    self.ifindex().unwrap_or(0),
                    SocketAddr::new(group, LLMNR_PORT),
                    packet,
                )?;
            }

            Protocol::Mdns => return Err(Error::AddressFamilyNotSupported),
        }

        Ok(())
    }

    /// The DNS server currently in use by the scope. Only classic DNS
    /// scopes have one.
    pub fn dns_server(&self, manager: &dyn Manager) -> Option<DnsServer> {
        if self.protocol != Protocol::Dns {
            return None;
        }
        manager.dns_server(self.ifindex())
    }

    /// Moves on to the next DNS server, typically after the current one
    /// failed to respond.
    pub fn next_dns_server(&self, manager: &dyn Manager) {
        if self.protocol == Protocol::Dns {
            manager.next_dns_server(self.ifindex());
        }
    }

    /// Opens a TCP connection for the scope to `address` (or, if
    /// `None`, to the scope's current DNS server) on `port`. The
    /// connection is started non-blocking and may still be in progress.
    pub fn tcp_socket(
        &self,
        manager: &dyn Manager,
        address: Option<IpAddr>,
        port: u16,
    ) -> Result<TcpStream, Error> {
        let address = match address {
            Some(address) => address,
            None => self.dns_server(manager).ok_or(Error::NoServer)?.address,
        };
        let target = match address {
            IpAddr::V4(address) => SocketAddr::V4(SocketAddrV4::new(address, port)),
            IpAddr::V6(address) => SocketAddr::V6(SocketAddrV6::new(
                address,
                port,
                0,
                self.ifindex().unwrap_or(0),
            )),
        };
        let stream = socket::connect_tcp(target, self.ifindex(), self.protocol == Protocol::Llmnr)?;
        Ok(stream)
    }

    fn mtu(&self, manager: &dyn Manager) -> usize {
        let mtu = match self.link {
            Some(ref link) => link.mtu,
            None => manager.global_mtu(),
        };
        mtu as usize
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
