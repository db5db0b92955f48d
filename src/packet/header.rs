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

//! Header flag and RCODE types.

use std::fmt;

use super::constants::*;
use crate::protocol::Protocol;

////////////////////////////////////////////////////////////////////////
// RCODES                                                             //
////////////////////////////////////////////////////////////////////////

/// A (non-extended) response code.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Rcode(u8);

impl Rcode {
    pub const NOERROR: Self = Self(0);
    pub const FORMERR: Self = Self(1);
    pub const SERVFAIL: Self = Self(2);
    pub const NXDOMAIN: Self = Self(3);
    pub const NOTIMP: Self = Self(4);
    pub const REFUSED: Self = Self(5);
}

impl From<u8> for Rcode {
    fn from(raw: u8) -> Self {
        Self(raw & RCODE_MASK)
    }
}

impl From<Rcode> for u8 {
    fn from(rcode: Rcode) -> Self {
        rcode.0
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::NOERROR => f.write_str("NOERROR"),
            Self::FORMERR => f.write_str("FORMERR"),
            Self::SERVFAIL => f.write_str("SERVFAIL"),
            Self::NXDOMAIN => f.write_str("NXDOMAIN"),
            Self::NOTIMP => f.write_str("NOTIMP"),
            Self::REFUSED => f.write_str("REFUSED"),
            Self(value) => write!(f, "RCODE{value}"),
        }
    }
}

impl fmt::Debug for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

////////////////////////////////////////////////////////////////////////
// FLAGS                                                              //
////////////////////////////////////////////////////////////////////////

/// The flags carried in octets 2 and 3 of the header.
///
/// `c` and `t` are the LLMNR names of the bits; in classic DNS the same
/// bits are AA and RD.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Flags {
    pub qr: bool,
    pub opcode: u8,
    pub c: bool,
    pub tc: bool,
    pub t: bool,
    pub rcode: Rcode,
}

impl Flags {
    /// Returns the flags of a standard query. Classic DNS queries ask
    /// for recursion.
    pub fn query(protocol: Protocol) -> Self {
        Self {
            t: protocol == Protocol::Dns,
            ..Self::default()
        }
    }

    /// Returns the flags of a response.
    pub fn reply(tentative: bool, rcode: Rcode) -> Self {
        Self {
            qr: true,
            t: tentative,
            rcode,
            ..Self::default()
        }
    }

    /// Returns the flags of an LLMNR conflict announcement.
    pub fn conflict() -> Self {
        Self {
            c: true,
            ..Self::default()
        }
    }

    pub(super) fn to_octets(self) -> [u8; 2] {
        let mut first = (self.opcode << OPCODE_SHIFT) & OPCODE_MASK;
        if self.qr {
            first |= QR_MASK;
        }
        if self.c {
            first |= C_MASK;
        }
        if self.tc {
            first |= TC_MASK;
        }
        if self.t {
            first |= T_MASK;
        }
        [first, u8::from(self.rcode)]
    }
}
