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

//! Deciding which scopes a lookup should go to.

use std::fmt;
use std::net::IpAddr;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use super::Scope;
use crate::manager::Manager;
use crate::name;
use crate::protocol::{Family, Protocol};
use crate::rr::{Class, ResourceKey, Type};

/// How well a scope fits a domain.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScopeMatch {
    /// The scope is configured for the domain and should get it.
    Yes,

    /// The scope might be able to resolve the domain.
    Maybe,

    /// The scope is not suitable for the domain.
    No,
}

/// The protocols and families a lookup is allowed to use.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct LookupFlags(u64);

impl LookupFlags {
    pub const DNS: Self = Self(1);
    pub const LLMNR_IPV4: Self = Self(2);
    pub const LLMNR_IPV6: Self = Self(4);
    pub const MDNS_IPV4: Self = Self(8);
    pub const MDNS_IPV6: Self = Self(16);

    pub const LLMNR: Self = Self(Self::LLMNR_IPV4.0 | Self::LLMNR_IPV6.0);
    pub const MDNS: Self = Self(Self::MDNS_IPV4.0 | Self::MDNS_IPV6.0);
    pub const ALL: Self = Self(Self::DNS.0 | Self::LLMNR.0 | Self::MDNS.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The flags that select a scope of `protocol` and `family`.
    pub fn for_scope(protocol: Protocol, family: Family) -> Self {
        match (protocol, family) {
            (Protocol::Dns, _) => Self::DNS,
            (Protocol::Llmnr, Family::V4) => Self::LLMNR_IPV4,
            (Protocol::Llmnr, Family::V6) => Self::LLMNR_IPV6,
            (Protocol::Llmnr, Family::Any) => Self::LLMNR,
            (Protocol::Mdns, Family::V4) => Self::MDNS_IPV4,
            (Protocol::Mdns, Family::V6) => Self::MDNS_IPV6,
            (Protocol::Mdns, Family::Any) => Self::MDNS,
        }
    }
}

impl BitOr for LookupFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LookupFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for LookupFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for LookupFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: [(LookupFlags, &str); 5] = [
            (LookupFlags::DNS, "DNS"),
            (LookupFlags::LLMNR_IPV4, "LLMNR_IPV4"),
            (LookupFlags::LLMNR_IPV6, "LLMNR_IPV6"),
            (LookupFlags::MDNS_IPV4, "MDNS_IPV4"),
            (LookupFlags::MDNS_IPV6, "MDNS_IPV6"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("(empty)")?;
        }
        Ok(())
    }
}

/// Returns whether `domain` is under `suffix`, treating invalid names
/// as not matching.
fn under(domain: &str, suffix: &str) -> bool {
    name::ends_with(domain, suffix).unwrap_or(false)
}

impl Scope {
    /// Decides whether a lookup of `domain` should be sent to this
    /// scope. A non-zero `ifindex` restricts the lookup to that link;
    /// `flags` restricts the protocols and families.
    pub fn good_domain(&self, ifindex: u32, flags: LookupFlags, domain: &str) -> ScopeMatch {
        if ifindex != 0 && self.ifindex() != Some(ifindex) {
            return ScopeMatch::No;
        }
        if (LookupFlags::for_scope(self.protocol, self.family) & flags).is_empty() {
            return ScopeMatch::No;
        }

        if self.domains.iter().any(|suffix| under(domain, suffix)) {
            return ScopeMatch::Yes;
        }

        if name::is_root(domain).unwrap_or(true) || name::is_localhost(domain) {
            return ScopeMatch::No;
        }

        let maybe = match self.protocol {
            Protocol::Dns => {
                !under(domain, "254.169.in-addr.arpa")
                    && !under(domain, "0.8.e.f.ip6.arpa")
                    && name::is_single_label(domain) == Ok(false)
            }
            Protocol::Mdns => {
                under(domain, "254.169.in-addr.arpa")
                    || under(domain, "0.8.e.f.ip6.arpa")
                    || (under(domain, "local") && name::equal(domain, "local") == Ok(false))
            }
            Protocol::Llmnr => {
                under(domain, "in-addr.arpa")
                    || under(domain, "ip6.arpa")
                    || name::is_single_label(domain) == Ok(true)
            }
        };

        if maybe {
            ScopeMatch::Maybe
        } else {
            ScopeMatch::No
        }
    }

    /// Decides whether this scope can answer `key` at all. Multicast
    /// scopes of one family do not look up addresses of the other.
    pub fn good_key(&self, key: &ResourceKey) -> bool {
        if self.protocol == Protocol::Dns {
            return true;
        }
        if key.class() != Class::IN {
            return true;
        }
        match self.family {
            Family::V4 => key.rr_type() != Type::AAAA,
            Family::V6 => key.rr_type() != Type::A,
            Family::Any => true,
        }
    }

    /// Returns whether `address` is a DNS server this scope may accept
    /// responses from. Multicast scopes accept any responder.
    pub fn good_dns_server(&self, manager: &dyn Manager, address: &IpAddr) -> bool {
        if self.protocol != Protocol::Dns {
            return true;
        }
        manager.find_dns_server(self.ifindex(), address)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
