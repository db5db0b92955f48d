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

//! Resource keys and resource records.
//!
//! A [`ResourceKey`] is the (class, type, name) triple that identifies
//! an RRset; a [`ResourceRecord`] pairs a key with a TTL and RDATA. The
//! RDATA is kept in its uncompressed wire form. Names inside the RDATA
//! of the types that carry them (NS, CNAME, PTR, SOA, MX) are expanded
//! when a record is read from a message, so two records can be compared
//! octet by octet.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::name;

mod types;
pub use types::{Class, Type};

////////////////////////////////////////////////////////////////////////
// RESOURCE KEYS                                                      //
////////////////////////////////////////////////////////////////////////

/// The (class, type, name) triple identifying an RRset.
///
/// The owner name is stored in normalized form; equality and hashing
/// are ASCII-case-insensitive.
#[derive(Clone)]
pub struct ResourceKey {
    class: Class,
    rr_type: Type,
    name: String,
}

impl ResourceKey {
    /// Creates a new key, normalizing `name`.
    pub fn new(class: Class, rr_type: Type, name: &str) -> Result<Self, name::Error> {
        Ok(Self {
            class,
            rr_type,
            name: name::normalize(name)?,
        })
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn rr_type(&self) -> Type {
        self.rr_type
    }

    /// The normalized owner name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether a record with key `other` answers a question for
    /// this key. The question's class and type may be `ANY`.
    pub fn matches(&self, other: &ResourceKey) -> bool {
        (self.class == Class::ANY || self.class == other.class)
            && (self.rr_type == Type::ANY || self.rr_type == other.rr_type)
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.rr_type == other.rr_type
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state);
        self.rr_type.hash(state);
        for octet in self.name.bytes() {
            state.write_u8(octet.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}. {} {}", self.name, self.class, self.rr_type)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ResourceKey({self})")
    }
}

////////////////////////////////////////////////////////////////////////
// RESOURCE RECORDS                                                   //
////////////////////////////////////////////////////////////////////////

/// A resource record: a key, a TTL, and uncompressed RDATA.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceRecord {
    pub key: ResourceKey,
    pub ttl: u32,
    pub rdata: Box<[u8]>,
}

impl ResourceRecord {
    pub fn new(key: ResourceKey, ttl: u32, rdata: Box<[u8]>) -> Self {
        Self { key, ttl, rdata }
    }

    /// Creates an A or AAAA record (depending on the family of
    /// `address`) in class IN.
    pub fn address(name: &str, address: IpAddr, ttl: u32) -> Result<Self, name::Error> {
        let (rr_type, rdata) = match address {
            IpAddr::V4(address) => (Type::A, Box::from(&address.octets()[..])),
            IpAddr::V6(address) => (Type::AAAA, Box::from(&address.octets()[..])),
        };
        Ok(Self::new(ResourceKey::new(Class::IN, rr_type, name)?, ttl, rdata))
    }

    /// Creates a PTR record in class IN.
    pub fn ptr(name: &str, target: &str, ttl: u32) -> Result<Self, name::Error> {
        let mut rdata = Vec::new();
        name::write_uncompressed(target, &mut rdata)?;
        Ok(Self::new(
            ResourceKey::new(Class::IN, Type::PTR, name)?,
            ttl,
            rdata.into(),
        ))
    }

    /// Creates the synthetic SOA record returned alongside negative
    /// answers for names we are authoritative for.
    pub fn soa(name: &str, minimum: u32) -> Result<Self, name::Error> {
        let mut rdata = Vec::new();
        name::write_uncompressed(name, &mut rdata)?;
        name::write_uncompressed(&format!("root.{}", name::normalize(name)?), &mut rdata)?;
        for value in [1u32, 1, 1, 1, minimum] {
            rdata.extend_from_slice(&value.to_be_bytes());
        }
        Ok(Self::new(
            ResourceKey::new(Class::IN, Type::SOA, name)?,
            minimum,
            rdata.into(),
        ))
    }

    /// Returns whether this record carries the same key and RDATA as
    /// `other`. TTLs are not compared.
    pub fn same_data(&self, other: &ResourceRecord) -> bool {
        self.key == other.key && self.rdata == other.rdata
    }

    /// Returns the address carried by an IN A or IN AAAA record.
    pub fn ip_address(&self) -> Option<IpAddr> {
        if self.key.class != Class::IN {
            return None;
        }
        match self.key.rr_type {
            Type::A => <[u8; 4]>::try_from(&*self.rdata)
                .ok()
                .map(|octets| IpAddr::V4(Ipv4Addr::from(octets))),
            Type::AAAA => <[u8; 16]>::try_from(&*self.rdata)
                .ok()
                .map(|octets| IpAddr::V6(Ipv6Addr::from(octets))),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}. {} {} {} ",
            self.key.name, self.ttl, self.key.class, self.key.rr_type
        )?;
        if let Some(address) = self.ip_address() {
            return write!(f, "{address}");
        }
        match self.key.rr_type {
            Type::PTR | Type::CNAME | Type::NS => match name::read_compressed(&self.rdata, 0) {
                Ok((target, _)) => write!(f, "{target}."),
                Err(_) => write_generic_rdata(f, &self.rdata),
            },
            _ => write_generic_rdata(f, &self.rdata),
        }
    }
}

/// Writes RDATA in the RFC 3597 § 5 generic form.
fn write_generic_rdata(f: &mut fmt::Formatter, rdata: &[u8]) -> fmt::Result {
    write!(f, "\\# {}", rdata.len())?;
    if !rdata.is_empty() {
        f.write_str(" ")?;
        for octet in rdata {
            write!(f, "{octet:02x}")?;
        }
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn keys_compare_case_insensitively() {
        let a = ResourceKey::new(Class::IN, Type::A, "Host.Example.").unwrap();
        let b = ResourceKey::new(Class::IN, Type::A, "host.example").unwrap();
        let c = ResourceKey::new(Class::IN, Type::AAAA, "host.example").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn any_questions_match_all_types() {
        let question = ResourceKey::new(Class::IN, Type::ANY, "host").unwrap();
        let record = ResourceKey::new(Class::IN, Type::AAAA, "HOST").unwrap();
        assert!(question.matches(&record));
        assert!(!record.matches(&question));
    }

    #[test]
    fn address_records_round_trip_addresses() {
        let v4 = ResourceRecord::address("host", "192.0.2.1".parse().unwrap(), 30).unwrap();
        let v6 = ResourceRecord::address("host", "fe80::1".parse().unwrap(), 30).unwrap();
        assert_eq!(v4.key.rr_type(), Type::A);
        assert_eq!(v6.key.rr_type(), Type::AAAA);
        assert_eq!(v4.ip_address(), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(v6.ip_address(), Some("fe80::1".parse().unwrap()));
        assert_eq!(v4.to_string(), "host. 30 IN A 192.0.2.1");
    }

    #[test]
    fn same_data_ignores_ttl() {
        let a = ResourceRecord::address("host", "192.0.2.1".parse().unwrap(), 30).unwrap();
        let mut b = a.clone();
        b.ttl = 10;
        assert!(a.same_data(&b));
        b.rdata = vec![192, 0, 2, 2].into_boxed_slice();
        assert!(!a.same_data(&b));
    }

    #[test]
    fn ptr_records_display_their_target() {
        let ptr = ResourceRecord::ptr("1.2.0.192.in-addr.arpa", "host", 30).unwrap();
        assert_eq!(ptr.to_string(), "1.2.0.192.in-addr.arpa. 30 IN PTR host.");
    }
}
