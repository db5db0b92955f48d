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

//! Implementation of the [`Reader`] cursor over message octets.

use super::constants::HEADER_SIZE;
use super::Error;
use crate::name;
use crate::rr::{Class, ResourceKey, ResourceRecord, Type};

/// A cursor over the questions and records of a message. The cursor
/// starts just after the header; questions and then records must be
/// read in the order they appear.
pub struct Reader<'a> {
    octets: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            cursor: HEADER_SIZE,
        }
    }

    /// Reads a question entry.
    pub fn read_key(&mut self) -> Result<ResourceKey, Error> {
        let (name, name_len) = name::read_compressed(self.octets, self.cursor)?;
        let fixed = self.cursor + name_len;
        let rr_type = Type::from(self.u16_at(fixed)?);
        let class = Class::from(self.u16_at(fixed + 2)?);
        self.cursor = fixed + 4;
        Ok(ResourceKey::new(class, rr_type, &name)?)
    }

    /// Reads a resource record, expanding compressed names in the RDATA
    /// of the types known to carry them.
    pub fn read_rr(&mut self) -> Result<ResourceRecord, Error> {
        let (name, name_len) = name::read_compressed(self.octets, self.cursor)?;
        let fixed = self.cursor + name_len;
        let rr_type = Type::from(self.u16_at(fixed)?);
        let class = Class::from(self.u16_at(fixed + 2)?);
        let ttl = self.u32_at(fixed + 4)?;
        let rdlength = self.u16_at(fixed + 8)? as usize;
        let rdata_start = fixed + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > self.octets.len() {
            return Err(Error::UnexpectedEom);
        }

        let rdata = self.read_rdata(rr_type, rdata_start, rdata_end)?;
        self.cursor = rdata_end;
        Ok(ResourceRecord::new(
            ResourceKey::new(class, rr_type, &name)?,
            ttl,
            rdata.into_boxed_slice(),
        ))
    }

    fn read_rdata(&self, rr_type: Type, start: usize, end: usize) -> Result<Vec<u8>, Error> {
        let mut rdata = Vec::with_capacity(end - start);
        let mut index = start;
        match rr_type {
            Type::NS | Type::CNAME | Type::PTR => {
                index = self.expand_name(index, end, &mut rdata)?;
            }
            Type::MX => {
                rdata.extend_from_slice(self.octets.get(index..index + 2).ok_or(Error::InvalidRdata)?);
                index = self.expand_name(index + 2, end, &mut rdata)?;
            }
            Type::SOA => {
                index = self.expand_name(index, end, &mut rdata)?;
                index = self.expand_name(index, end, &mut rdata)?;
                let counters = self.octets.get(index..index + 20).ok_or(Error::InvalidRdata)?;
                rdata.extend_from_slice(counters);
                index += 20;
            }
            _ => {
                rdata.extend_from_slice(&self.octets[start..end]);
                index = end;
            }
        }
        if index == end {
            Ok(rdata)
        } else {
            Err(Error::InvalidRdata)
        }
    }

    /// Reads a compressed name at `index` that must end by `end`,
    /// appending it uncompressed to `out`. Returns the index after it.
    fn expand_name(&self, index: usize, end: usize, out: &mut Vec<u8>) -> Result<usize, Error> {
        if index >= end {
            return Err(Error::InvalidRdata);
        }
        let (name, len) = name::read_compressed(self.octets, index)?;
        if index + len > end {
            return Err(Error::InvalidRdata);
        }
        name::write_uncompressed(&name, out)?;
        Ok(index + len)
    }

    fn u16_at(&self, index: usize) -> Result<u16, Error> {
        match self.octets.get(index..index + 2) {
            Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
            None => Err(Error::UnexpectedEom),
        }
    }

    fn u32_at(&self, index: usize) -> Result<u32, Error> {
        match self.octets.get(index..index + 4) {
            Some(bytes) => Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            None => Err(Error::UnexpectedEom),
        }
    }
}
