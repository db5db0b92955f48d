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

//! Implementation of the [`Error`] type for scope operations.

use std::fmt;
use std::io;

use crate::packet;

/// An error returned by scope operations. None of these are retried
/// automatically.
#[derive(Debug)]
pub enum Error {
    /// Classic DNS and LLMNR packets carry a single question.
    NotSupported,

    /// The packet is larger than the transport allows.
    MessageTooLarge,

    /// No DNS server is configured for the scope.
    NoServer,

    /// The scope's send rate limit is exhausted.
    RateLimited,

    /// The scope's protocol or family cannot send this way.
    AddressFamilyNotSupported,

    /// The packet belongs to a different protocol than the scope.
    ProtocolMismatch,

    /// The arguments do not describe a valid operation.
    InvalidArgument,

    /// Every message ID is taken by a transaction of the scope.
    NoFreeTransactionId,

    /// A packet could not be built.
    Packet(packet::Error),

    /// A socket operation failed.
    Io(io::Error),
}

impl From<packet::Error> for Error {
    fn from(error: packet::Error) -> Self {
        Self::Packet(error)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotSupported => f.write_str("packets with more than one question are not supported"),
            Self::MessageTooLarge => f.write_str("message too large"),
            Self::NoServer => f.write_str("no DNS server available"),
            Self::RateLimited => f.write_str("send rate limit exceeded"),
            Self::AddressFamilyNotSupported => f.write_str("address family not supported by protocol"),
            Self::ProtocolMismatch => f.write_str("packet protocol does not match scope"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NoFreeTransactionId => f.write_str("no free transaction ID"),
            Self::Packet(e) => write!(f, "failed to build packet: {e}"),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Packet(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
