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

//! Header layout of DNS and LLMNR messages.
//!
//! LLMNR (RFC 4795 § 2.1.1) reuses the DNS header, giving the AA bit
//! the meaning C (conflict) and the RD bit the meaning T (tentative).

pub const HEADER_SIZE: usize = 12;
pub const MAX_MESSAGE_SIZE: usize = 65535;

pub const ID_START: usize = 0;
pub const FLAGS_BYTE: usize = 2;
pub const QR_MASK: u8 = 0x80;
pub const OPCODE_MASK: u8 = 0x78;
pub const OPCODE_SHIFT: u32 = 3;
pub const C_MASK: u8 = 0x04;
pub const TC_MASK: u8 = 0x02;
pub const T_MASK: u8 = 0x01;
pub const RCODE_BYTE: usize = 3;
pub const RCODE_MASK: u8 = 0x0f;
pub const QDCOUNT_START: usize = 4;
pub const ANCOUNT_START: usize = 6;
pub const NSCOUNT_START: usize = 8;
pub const ARCOUNT_START: usize = 10;
