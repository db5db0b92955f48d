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

use std::io::{self, Error, ErrorKind};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use super::{Datagram, UdpOptions};

fn unsupported() -> Error {
    Error::new(
        ErrorKind::Unsupported,
        "link-scoped sockets are not supported on this target",
    )
}

pub fn connect_tcp(_target: SocketAddr, _ifindex: Option<u32>, _single_hop: bool) -> io::Result<TcpStream> {
    Err(unsupported())
}

pub fn set_multicast_membership(_fd: RawFd, _group: IpAddr, _ifindex: u32, _join: bool) -> io::Result<()> {
    Err(unsupported())
}

/// A placeholder that can never be constructed.
pub struct UdpSocket {
    fd: RawFd,
}

impl UdpSocket {
    pub fn bind(_addr: SocketAddr, _options: &UdpOptions) -> io::Result<Self> {
        Err(unsupported())
    }

    pub fn recv(&mut self, _buf: &mut [u8]) -> io::Result<Datagram> {
        Err(unsupported())
    }

    pub fn send(&self, _buf: &[u8], _dest: SocketAddr, _ifindex: u32) -> io::Result<usize> {
        Err(unsupported())
    }
}

impl AsRawFd for UdpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}
