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

//! Implementation of the [`PacketWriter`] type.

use super::constants::*;
use super::{Error, Flags, Packet, PacketInfo};
use crate::answer::Answer;
use crate::name;
use crate::protocol::Protocol;
use crate::question::Question;
use crate::rr::{ResourceKey, ResourceRecord};

/// A record section of a message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

/// Builds an outgoing [`Packet`].
///
/// Questions and records may be added in any order; they are laid out
/// in section order by [`PacketWriter::finish`]. Names are written
/// uncompressed.
#[derive(Clone, Debug)]
pub struct PacketWriter {
    protocol: Protocol,
    id: u16,
    flags: Flags,
    question: Vec<ResourceKey>,
    sections: [Vec<ResourceRecord>; 3],
}

impl PacketWriter {
    /// Creates a writer for an empty message with ID 0 and no flags
    /// set.
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            id: 0,
            flags: Flags::default(),
            question: Vec::new(),
            sections: Default::default(),
        }
    }

    pub fn set_id(&mut self, id: u16) {
        self.id = id;
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    pub fn add_key(&mut self, key: &ResourceKey) {
        self.question.push(key.clone());
    }

    pub fn add_question(&mut self, question: &Question) {
        self.question.extend(question.keys().iter().cloned());
    }

    pub fn add_rr(&mut self, section: Section, rr: &ResourceRecord) {
        self.sections[section as usize].push(rr.clone());
    }

    pub fn add_answer(&mut self, section: Section, answer: &Answer) {
        self.sections[section as usize].extend(answer.iter().cloned());
    }

    /// Lays out the message.
    pub fn finish(self) -> Result<Packet, Error> {
        let mut octets = Vec::with_capacity(512);
        octets.extend_from_slice(&self.id.to_be_bytes());
        octets.extend_from_slice(&self.flags.to_octets());
        octets.extend_from_slice(&count(self.question.len())?.to_be_bytes());
        for section in &self.sections {
            octets.extend_from_slice(&count(section.len())?.to_be_bytes());
        }

        for key in &self.question {
            write_key(key, &mut octets)?;
        }
        for rr in self.sections.iter().flatten() {
            write_key(&rr.key, &mut octets)?;
            octets.extend_from_slice(&rr.ttl.to_be_bytes());
            let rdlength = u16::try_from(rr.rdata.len()).or(Err(Error::TooLarge))?;
            octets.extend_from_slice(&rdlength.to_be_bytes());
            octets.extend_from_slice(&rr.rdata);
        }

        Packet::from_octets(self.protocol, octets, PacketInfo::default())
    }
}

fn count(n: usize) -> Result<u16, Error> {
    u16::try_from(n).or(Err(Error::TooLarge))
}

fn write_key(key: &ResourceKey, octets: &mut Vec<u8>) -> Result<(), Error> {
    name::write_uncompressed(key.name(), octets)?;
    octets.extend_from_slice(&u16::from(key.rr_type()).to_be_bytes());
    octets.extend_from_slice(&u16::from(key.class()).to_be_bytes());
    if octets.len() > MAX_MESSAGE_SIZE {
        Err(Error::TooLarge)
    } else {
        Ok(())
    }
}
