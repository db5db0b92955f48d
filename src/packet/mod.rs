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

//! DNS and LLMNR packets.
//!
//! A [`Packet`] is the raw octets of a message along with the protocol
//! it belongs to and, for packets we received, where it came from
//! ([`PacketInfo`]). Header fields are read directly from the octets;
//! the question and records are parsed on demand by
//! [`Packet::extract`]. Outgoing packets are built with
//! [`PacketWriter`].

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::answer::Answer;
use crate::name;
use crate::protocol::{Family, Protocol};
use crate::question::Question;

mod constants;
mod header;
mod reader;
mod writer;

use constants::*;
pub use constants::{HEADER_SIZE, MAX_MESSAGE_SIZE};
pub use header::{Flags, Rcode};
pub use writer::{PacketWriter, Section};

////////////////////////////////////////////////////////////////////////
// PACKETS                                                            //
////////////////////////////////////////////////////////////////////////

/// The transport a packet arrived over.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
}

/// Receive metadata for a packet.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PacketInfo {
    /// The address and port the packet came from.
    pub sender: Option<SocketAddr>,

    /// The local address the packet was sent to.
    pub destination: Option<IpAddr>,

    /// The index of the interface the packet arrived on (0 if
    /// unknown).
    pub ifindex: u32,

    pub transport: Transport,
}

/// A DNS or LLMNR message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    protocol: Protocol,
    octets: Vec<u8>,
    info: PacketInfo,
}

/// The parsed contents of a packet. All records of the answer,
/// authority, and additional sections are collected into `answer`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Sections {
    pub question: Question,
    pub answer: Answer,
}

impl Packet {
    /// Wraps received octets. This fails if `octets` cannot hold a
    /// full header.
    pub fn from_octets(protocol: Protocol, octets: Vec<u8>, info: PacketInfo) -> Result<Self, Error> {
        if octets.len() < HEADER_SIZE {
            Err(Error::HeaderTooShort)
        } else if octets.len() > MAX_MESSAGE_SIZE {
            Err(Error::TooLarge)
        } else {
            Ok(Self {
                protocol,
                octets,
                info,
            })
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn octets(&self) -> &[u8] {
        &self.octets
    }

    /// The size of the message in octets.
    pub fn size(&self) -> usize {
        self.octets.len()
    }

    pub fn info(&self) -> &PacketInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut PacketInfo {
        &mut self.info
    }

    /// The address family the packet was received over, if known.
    pub fn family(&self) -> Option<Family> {
        self.info.sender.map(|sender| Family::of(&sender.ip()))
    }

    fn u16_at(&self, index: usize) -> u16 {
        u16::from_be_bytes([self.octets[index], self.octets[index + 1]])
    }

    pub fn id(&self) -> u16 {
        self.u16_at(ID_START)
    }

    /// Returns whether the QR (query response) bit is set.
    pub fn qr(&self) -> bool {
        self.octets[FLAGS_BYTE] & QR_MASK != 0
    }

    pub fn opcode(&self) -> u8 {
        (self.octets[FLAGS_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT
    }

    /// Returns whether the C (conflict) bit is set. In classic DNS this
    /// is the AA bit.
    pub fn c(&self) -> bool {
        self.octets[FLAGS_BYTE] & C_MASK != 0
    }

    /// Returns whether the TC (truncation) bit is set.
    pub fn tc(&self) -> bool {
        self.octets[FLAGS_BYTE] & TC_MASK != 0
    }

    /// Returns whether the T (tentative) bit is set. In classic DNS
    /// this is the RD bit.
    pub fn t(&self) -> bool {
        self.octets[FLAGS_BYTE] & T_MASK != 0
    }

    pub fn rcode(&self) -> Rcode {
        Rcode::from(self.octets[RCODE_BYTE])
    }

    pub fn qdcount(&self) -> u16 {
        self.u16_at(QDCOUNT_START)
    }

    pub fn ancount(&self) -> u16 {
        self.u16_at(ANCOUNT_START)
    }

    pub fn nscount(&self) -> u16 {
        self.u16_at(NSCOUNT_START)
    }

    pub fn arcount(&self) -> u16 {
        self.u16_at(ARCOUNT_START)
    }

    /// The total number of records in the answer, authority, and
    /// additional sections.
    pub fn rrcount(&self) -> usize {
        self.ancount() as usize + self.nscount() as usize + self.arcount() as usize
    }

    /// Parses the question and all records of the packet.
    pub fn extract(&self) -> Result<Sections, Error> {
        let mut reader = reader::Reader::new(&self.octets);
        let mut sections = Sections::default();
        for _ in 0..self.qdcount() {
            sections.question.add(reader.read_key()?);
        }
        for _ in 0..self.rrcount() {
            sections.answer.add(reader.read_rr()?);
        }
        Ok(sections)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error raised while parsing or building a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The message is shorter than a header.
    HeaderTooShort,

    /// A name in the message was invalid.
    InvalidName(name::Error),

    /// RDATA did not match the format of its type.
    InvalidRdata,

    /// The message would exceed 65,535 octets (or a section would
    /// exceed 65,535 entries).
    TooLarge,

    /// The message ended in the middle of a question or record.
    UnexpectedEom,
}

impl From<name::Error> for Error {
    fn from(error: name::Error) -> Self {
        Self::InvalidName(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HeaderTooShort => f.write_str("message is shorter than a header"),
            Self::InvalidName(e) => write!(f, "invalid name: {e}"),
            Self::InvalidRdata => f.write_str("invalid RDATA"),
            Self::TooLarge => f.write_str("message is too large"),
            Self::UnexpectedEom => f.write_str("unexpected end of message"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName(e) => Some(e),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::{Class, ResourceKey, ResourceRecord, Type};

    #[test]
    fn short_packets_are_rejected() {
        assert_eq!(
            Packet::from_octets(Protocol::Llmnr, vec![0; 11], PacketInfo::default()),
            Err(Error::HeaderTooShort)
        );
    }

    #[test]
    fn header_accessors_read_llmnr_bits() {
        let mut octets = vec![0; HEADER_SIZE];
        octets[0] = 0x12;
        octets[1] = 0x34;
        octets[2] = QR_MASK | C_MASK | T_MASK;
        octets[3] = 3;
        octets[7] = 2;
        octets[11] = 1;
        let packet = Packet::from_octets(Protocol::Llmnr, octets, PacketInfo::default()).unwrap();
        assert_eq!(packet.id(), 0x1234);
        assert!(packet.qr());
        assert!(packet.c());
        assert!(!packet.tc());
        assert!(packet.t());
        assert_eq!(packet.rcode(), Rcode::NXDOMAIN);
        assert_eq!(packet.ancount(), 2);
        assert_eq!(packet.rrcount(), 3);
    }

    #[test]
    fn written_packets_extract_to_the_same_sections() {
        let key = ResourceKey::new(Class::IN, Type::A, "host").unwrap();
        let rr = ResourceRecord::address("host", "192.0.2.1".parse().unwrap(), 30).unwrap();
        let ptr = ResourceRecord::ptr("1.2.0.192.in-addr.arpa", "host", 30).unwrap();
        let mut writer = PacketWriter::new(Protocol::Llmnr);
        writer.set_id(7);
        writer.set_flags(Flags::reply(true, Rcode::NOERROR));
        writer.add_key(&key);
        writer.add_rr(Section::Answer, &rr);
        writer.add_rr(Section::Additional, &ptr);
        let packet = writer.finish().unwrap();

        assert_eq!(packet.id(), 7);
        assert!(packet.qr() && packet.t() && !packet.c());
        assert_eq!((packet.qdcount(), packet.ancount(), packet.arcount()), (1, 1, 1));

        let sections = packet.extract().unwrap();
        assert_eq!(sections.question, Question::from(key));
        assert_eq!(sections.answer.records(), [rr, ptr]);
    }

    #[test]
    fn compressed_rdata_names_are_expanded() {
        // Question "host" IN PTR, answer with owner and RDATA names
        // compressed against the question.
        let mut octets = vec![0, 1, 0x80, 0, 0, 1, 0, 1, 0, 0, 0, 0];
        octets.extend_from_slice(b"\x04host\x00\x00\x0c\x00\x01");
        octets.extend_from_slice(b"\xc0\x0c\x00\x0c\x00\x01\x00\x00\x00\x1e\x00\x04\x01x\xc0\x0c");
        let packet = Packet::from_octets(Protocol::Dns, octets, PacketInfo::default()).unwrap();
        let sections = packet.extract().unwrap();
        let rr = &sections.answer.records()[0];
        assert_eq!(&*rr.rdata, b"\x01x\x04host\x00");
        assert_eq!(rr.to_string(), "host. 30 IN PTR x.host.");
    }

    #[test]
    fn truncated_records_fail_extraction() {
        let key = ResourceKey::new(Class::IN, Type::A, "host").unwrap();
        let mut writer = PacketWriter::new(Protocol::Llmnr);
        writer.add_key(&key);
        let mut octets = writer.finish().unwrap().octets().to_vec();
        octets[7] = 1; // claim an answer that is not there
        let packet = Packet::from_octets(Protocol::Llmnr, octets, PacketInfo::default()).unwrap();
        assert_eq!(packet.extract(), Err(Error::InvalidName(name::Error::UnexpectedEom)));
    }
}
