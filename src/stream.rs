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

//! Message streams over TCP.
//!
//! Over TCP, each DNS or LLMNR message is preceded by its length as a
//! two-octet integer (RFC 1035 § 4.2.2). [`TcpPacketStream`] frames
//! messages that way over any [`Read`] + [`Write`] transport, buffering
//! partial reads and writes so it can be driven by a non-blocking
//! socket.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;

use log::debug;

use crate::packet::{Packet, PacketInfo, Transport};
use crate::protocol::Protocol;

/// Something a reply can be written to instead of being sent over UDP.
pub trait PacketStream {
    /// Queues `packet` for transmission.
    fn write_packet(&mut self, packet: &Packet) -> io::Result<()>;
}

/// A length-prefixed message stream.
pub struct TcpPacketStream<S = TcpStream> {
    stream: S,
    protocol: Protocol,
    info: PacketInfo,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    eof: bool,
}

impl<S: Read + Write> TcpPacketStream<S> {
    /// Wraps `stream`. Packets read from it are tagged with `protocol`
    /// and with `info` (whose transport is forced to TCP).
    pub fn new(stream: S, protocol: Protocol, mut info: PacketInfo) -> Self {
        info.transport = Transport::Tcp;
        Self {
            stream,
            protocol,
            info,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            eof: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Whether the peer has closed its side of the stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether queued output remains to be written.
    pub fn has_pending_writes(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Writes as much queued output as the transport accepts. Returns
    /// whether everything has been written.
    pub fn flush(&mut self) -> io::Result<bool> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
        self.stream.flush()?;
        Ok(true)
    }

    /// Reads the next complete message, if one is available without
    /// blocking. Malformed messages are dropped, as is a partial
    /// message cut off by the end of the stream.
    pub fn read_packet(&mut self) -> io::Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.take_buffered() {
                return Ok(Some(packet));
            }
            if self.eof {
                return Ok(None);
            }

            let mut chunk = [0; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if !self.read_buf.is_empty() {
                        debug!(
                            "Dropping truncated message ({} octets buffered) at end of TCP stream.",
                            self.read_buf.len()
                        );
                        self.read_buf.clear();
                    }
                    self.eof = true;
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
    }

    fn take_buffered(&mut self) -> Option<Packet> {
        while self.read_buf.len() >= 2 {
            let len = u16::from_be_bytes([self.read_buf[0], self.read_buf[1]]) as usize;
            if self.read_buf.len() < 2 + len {
                return None;
            }
            let octets = self.read_buf[2..2 + len].to_vec();
            self.read_buf.drain(..2 + len);
            match Packet::from_octets(self.protocol, octets, self.info.clone()) {
                Ok(packet) => return Some(packet),
                Err(e) => debug!("Dropping malformed message on TCP stream: {e}."),
            }
        }
        None
    }
}

impl<S: Read + Write> PacketStream for TcpPacketStream<S> {
    fn write_packet(&mut self, packet: &Packet) -> io::Result<()> {
        // Packet sizes are capped at 65,535 octets, so this cannot
        // truncate.
        let len = packet.size() as u16;
        self.write_buf.extend_from_slice(&len.to_be_bytes());
        self.write_buf.extend_from_slice(packet.octets());
        self.flush().map(|_| ())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
