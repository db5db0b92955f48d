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

//! Resolution protocols, address families, and protocol constants.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// The UDP and TCP port of classic DNS.
pub const DNS_PORT: u16 = 53;

/// The UDP and TCP port of LLMNR (RFC 4795 § 2.5).
pub const LLMNR_PORT: u16 = 5355;

/// The IPv4 link-scope multicast group for LLMNR queries.
pub const LLMNR_MULTICAST_IPV4_ADDRESS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 252);

/// The IPv6 link-scope multicast group for LLMNR queries.
pub const LLMNR_MULTICAST_IPV6_ADDRESS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 3);

/// The largest classic DNS message we send over UDP (RFC 1035 § 4.2.1).
pub const DNS_PACKET_UNICAST_SIZE_MAX: usize = 512;

/// The window over which LLMNR conflict announcements are jittered
/// (RFC 4795 § 7).
pub const LLMNR_JITTER_INTERVAL: Duration = Duration::from_millis(100);

/// The TTL of records we publish over LLMNR.
pub const LLMNR_DEFAULT_TTL: u32 = 30;

/// The interval of each scope's send rate limiter.
pub const SEND_RATELIMIT_INTERVAL: Duration = Duration::from_secs(1);

/// The number of packets each scope may send per
/// [`SEND_RATELIMIT_INTERVAL`].
pub const SEND_RATELIMIT_BURST: u32 = 1000;

////////////////////////////////////////////////////////////////////////
// PROTOCOLS                                                          //
////////////////////////////////////////////////////////////////////////

/// A name-resolution protocol.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Protocol {
    /// Classic unicast DNS to configured servers.
    Dns,

    /// Link-Local Multicast Name Resolution (RFC 4795).
    Llmnr,

    /// Multicast DNS (RFC 6762).
    Mdns,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Dns => "dns",
            Self::Llmnr => "llmnr",
            Self::Mdns => "mdns",
        })
    }
}

////////////////////////////////////////////////////////////////////////
// ADDRESS FAMILIES                                                   //
////////////////////////////////////////////////////////////////////////

/// An address family restriction.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Family {
    /// No restriction.
    Any,
    V4,
    V6,
}

impl Family {
    /// Returns the family of `address`.
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Returns the LLMNR multicast group of this family, if it is a
    /// concrete family.
    pub fn llmnr_group(self) -> Option<IpAddr> {
        match self {
            Self::V4 => Some(IpAddr::V4(LLMNR_MULTICAST_IPV4_ADDRESS)),
            Self::V6 => Some(IpAddr::V6(LLMNR_MULTICAST_IPV6_ADDRESS)),
            Self::Any => None,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "*",
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
        })
    }
}
