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

//! Provides target-specific socket support.
//!
//! Link-scoped resolution needs several socket features that the Rust
//! standard library does not expose:
//!
//! 1. **Interface-bound unicast.** TCP connections for a link-scoped
//!    lookup must leave through that link, even when the routing table
//!    would pick another. Linux provides `IP_UNICAST_IF` and
//!    `IPV6_UNICAST_IF` for this.
//!
//! 2. **Multicast group membership per interface.** LLMNR listens on
//!    224.0.0.252 and ff02::1:3 on each link it is enabled for, using a
//!    single shared socket per family.
//!
//! 3. **Packet information.** LLMNR responders must know which
//!    interface and which destination address a query arrived on, and
//!    must be able to pick the outgoing interface of multicast sends.
//!    This is the `IP_PKTINFO` / `IPV6_RECVPKTINFO` machinery.
//!
//! These are currently implemented for **Linux** only. On other targets
//! every operation fails with [`ErrorKind::Unsupported`].
//!
//! [`ErrorKind::Unsupported`]: std::io::ErrorKind::Unsupported

use std::net::{IpAddr, SocketAddr};

use cfg_if::cfg_if;

/// Options for [`UdpSocket::bind`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UdpOptions {
    /// Set `SO_REUSEADDR`.
    pub reuse_address: bool,

    /// Receive the destination address and interface of each datagram.
    pub packet_info: bool,

    /// Unicast and multicast hop limit for outgoing datagrams.
    pub hop_limit: Option<u8>,

    /// Whether our own multicast datagrams are looped back to us.
    pub multicast_loop: bool,

    /// Open the socket in non-blocking mode.
    pub nonblocking: bool,
}

/// A received datagram.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Datagram {
    /// The number of octets received.
    pub len: usize,

    pub source: SocketAddr,

    /// The address the datagram was sent to, when packet information
    /// was requested.
    pub destination: Option<IpAddr>,

    /// The interface the datagram arrived on (0 if unknown).
    pub ifindex: u32,
}

cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::{connect_tcp, set_multicast_membership, UdpSocket};
    } else {
        mod unsupported;
        pub use unsupported::{connect_tcp, set_multicast_membership, UdpSocket};
    }
}
