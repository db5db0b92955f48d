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

use std::io::{self, Error, ErrorKind, IoSlice, IoSliceMut};
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use libc::{c_int, c_uint, c_void, in6_addr, in6_pktinfo, in_addr, in_pktinfo, socklen_t};
use nix::cmsg_space;
use nix::errno::Errno;
use nix::sys::socket::{
    bind, connect, recvmsg, sendmsg, setsockopt, socket, sockopt, AddressFamily, CmsgIterator,
    ControlMessage, ControlMessageOwned, MsgFlags, RecvMsg, SockFlag, SockProtocol, SockType,
    SockaddrStorage,
};
use nix::unistd::close;

use super::{Datagram, UdpOptions};

// Not every libc release carries these.
const IP_UNICAST_IF: c_int = 50;
const IPV6_UNICAST_IF: c_int = 76;

////////////////////////////////////////////////////////////////////////
// HELPERS                                                            //
////////////////////////////////////////////////////////////////////////

/// Closes the wrapped file descriptor when dropped, unless it has been
/// [released](FdGuard::release).
struct FdGuard(RawFd);

impl FdGuard {
    fn release(self) -> RawFd {
        let fd = self.0;
        mem::forget(self);
        fd
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        let _ = close(self.0);
    }
}

/// Sets a socket option whose value nix does not model.
fn setsockopt_raw<T>(fd: RawFd, level: c_int, name: c_int, value: &T) -> io::Result<()> {
    let result = unsafe {
        // SAFETY: value points to a live T of the given size for the
        // duration of the call.
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const c_void,
            mem::size_of::<T>() as socklen_t,
        )
    };
    if result < 0 {
        Err(Error::last_os_error())
    } else {
        Ok(())
    }
}

fn address_family(addr: &SocketAddr) -> AddressFamily {
    if addr.is_ipv6() {
        AddressFamily::Inet6
    } else {
        AddressFamily::Inet
    }
}

////////////////////////////////////////////////////////////////////////
// TCP AND MULTICAST MEMBERSHIP                                       //
////////////////////////////////////////////////////////////////////////

/// Starts a non-blocking TCP connection to `target`. With `ifindex`,
/// the connection is bound to that interface; with `single_hop`, the
/// unicast hop limit is set to 1. The connection may still be in
/// progress when this returns.
pub fn connect_tcp(target: SocketAddr, ifindex: Option<u32>, single_hop: bool) -> io::Result<TcpStream> {
    let fd = FdGuard(socket(
        address_family(&target),
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        SockProtocol::Tcp,
    )?);

    setsockopt(fd.0, sockopt::TcpNoDelay, &true)?;

    if let Some(ifindex) = ifindex {
        match target {
            // IP_UNICAST_IF takes the index in network byte order.
            SocketAddr::V4(_) => setsockopt_raw(fd.0, libc::IPPROTO_IP, IP_UNICAST_IF, &ifindex.to_be())?,
            SocketAddr::V6(_) => {
                setsockopt_raw(fd.0, libc::IPPROTO_IPV6, IPV6_UNICAST_IF, &(ifindex as c_int))?
            }
        }
    }

    if single_hop {
        let one: c_int = 1;
        match target {
            SocketAddr::V4(_) => setsockopt_raw(fd.0, libc::IPPROTO_IP, libc::IP_TTL, &one)?,
            SocketAddr::V6(_) => {
                setsockopt_raw(fd.0, libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS, &one)?
            }
        }
    }

    match connect(fd.0, &SockaddrStorage::from(target)) {
        Ok(()) | Err(Errno::EINPROGRESS) => (),
        Err(e) => return Err(e.into()),
    }

    Ok(unsafe {
        // SAFETY: we own the descriptor and hand it over.
        TcpStream::from_raw_fd(fd.release())
    })
}

/// Joins (or leaves) `group` on interface `ifindex` on socket `fd`.
pub fn set_multicast_membership(fd: RawFd, group: IpAddr, ifindex: u32, join: bool) -> io::Result<()> {
    match group {
        IpAddr::V4(group) => {
            let mreq = libc::ip_mreqn {
                imr_multiaddr: in_addr {
                    s_addr: u32::from(group).to_be(),
                },
                imr_address: in_addr { s_addr: 0 },
                imr_ifindex: ifindex as c_int,
            };
            let name = if join {
                libc::IP_ADD_MEMBERSHIP
            } else {
                libc::IP_DROP_MEMBERSHIP
            };
            setsockopt_raw(fd, libc::IPPROTO_IP, name, &mreq)
        }
        IpAddr::V6(group) => {
            let mreq = libc::ipv6_mreq {
                ipv6mr_multiaddr: in6_addr {
                    s6_addr: group.octets(),
                },
                ipv6mr_interface: ifindex as c_uint,
            };
            let name = if join {
                libc::IPV6_ADD_MEMBERSHIP
            } else {
                libc::IPV6_DROP_MEMBERSHIP
            };
            setsockopt_raw(fd, libc::IPPROTO_IPV6, name, &mreq)
        }
    }
}

////////////////////////////////////////////////////////////////////////
// UDP SOCKETS WITH PACKET INFORMATION                                //
////////////////////////////////////////////////////////////////////////

/// A UDP socket that can report and select the interface of each
/// datagram. The [`Drop`] implementation closes the file descriptor.
pub struct UdpSocket {
    fd: RawFd,
    ipv6: bool,
    cmsg_buf: Vec<u8>,
}

impl UdpSocket {
    /// Creates a new UDP socket bound to `addr`.
    pub fn bind(addr: SocketAddr, options: &UdpOptions) -> io::Result<Self> {
        let mut flags = SockFlag::SOCK_CLOEXEC;
        if options.nonblocking {
            flags |= SockFlag::SOCK_NONBLOCK;
        }
        let fd = FdGuard(socket(
            address_family(&addr),
            SockType::Datagram,
            flags,
            SockProtocol::Udp,
        )?);
        let ipv6 = addr.is_ipv6();

        if ipv6 {
            setsockopt(fd.0, sockopt::Ipv6V6Only, &true)?;
        }
        if options.reuse_address {
            setsockopt(fd.0, sockopt::ReuseAddr, &true)?;
        }
        if options.packet_info {
            if ipv6 {
                setsockopt(fd.0, sockopt::Ipv6RecvPacketInfo, &true)?;
            } else {
                setsockopt(fd.0, sockopt::Ipv4PacketInfo, &true)?;
            }
        }
        if let Some(hops) = options.hop_limit {
            let hops = c_int::from(hops);
            if ipv6 {
                setsockopt_raw(fd.0, libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS, &hops)?;
                setsockopt_raw(fd.0, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS, &hops)?;
            } else {
                setsockopt_raw(fd.0, libc::IPPROTO_IP, libc::IP_TTL, &hops)?;
                setsockopt_raw(fd.0, libc::IPPROTO_IP, libc::IP_MULTICAST_TTL, &hops)?;
            }
        }
        let multicast_loop = c_int::from(options.multicast_loop);
        if ipv6 {
            setsockopt_raw(fd.0, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_LOOP, &multicast_loop)?;
        } else {
            setsockopt_raw(fd.0, libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP, &multicast_loop)?;
        }

        bind(fd.0, &SockaddrStorage::from(addr))?;

        Ok(Self {
            fd: fd.release(),
            ipv6,
            cmsg_buf: if ipv6 {
                cmsg_space!(in6_pktinfo)
            } else {
                cmsg_space!(in_pktinfo)
            },
        })
    }

    /// Receives a datagram.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<Datagram> {
        let mut iov = [IoSliceMut::new(buf)];
        let msg: RecvMsg<SockaddrStorage> =
            recvmsg(self.fd, &mut iov, Some(&mut self.cmsg_buf), MsgFlags::empty())?;
        let (destination, ifindex) = extract_packet_info(msg.cmsgs());
        let source = extract_source(self.ipv6, msg.address.as_ref())?;
        Ok(Datagram {
            len: msg.bytes,
            source,
            destination,
            ifindex,
        })
    }

    /// Sends a datagram to `dest`. A non-zero `ifindex` selects the
    /// outgoing interface.
    pub fn send(&self, buf: &[u8], dest: SocketAddr, ifindex: u32) -> io::Result<usize> {
        let iov = [IoSlice::new(buf)];
        let dest_sockaddr = SockaddrStorage::from(dest);
        if ifindex == 0 {
            return sendmsg(self.fd, &iov, &[], MsgFlags::empty(), Some(&dest_sockaddr))
                .map_err(Into::into);
        }

        if self.ipv6 {
            let info = in6_pktinfo {
                ipi6_addr: in6_addr { s6_addr: [0; 16] },
                ipi6_ifindex: ifindex as c_uint,
            };
            let cmsgs = [ControlMessage::Ipv6PacketInfo(&info)];
            sendmsg(self.fd, &iov, &cmsgs, MsgFlags::empty(), Some(&dest_sockaddr))
                .map_err(Into::into)
        } else {
            let info = in_pktinfo {
                ipi_ifindex: ifindex as c_int,
                ipi_spec_dst: in_addr { s_addr: 0 },
                ipi_addr: in_addr { s_addr: 0 },
            };
            let cmsgs = [ControlMessage::Ipv4PacketInfo(&info)];
            sendmsg(self.fd, &iov, &cmsgs, MsgFlags::empty(), Some(&dest_sockaddr))
                .map_err(Into::into)
        }
    }
}

impl AsRawFd for UdpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        let _ = close(self.fd);
    }
}

/// Converts the source address provided by `recvmsg` into a Rust
/// [`SocketAddr`].
fn extract_source(ipv6: bool, raw: Option<&SockaddrStorage>) -> io::Result<SocketAddr> {
    let raw = raw.ok_or_else(|| {
        Error::new(ErrorKind::Other, "recvmsg did not return the source address")
    })?;
    let source = if ipv6 {
        raw.as_sockaddr_in6()
            .map(|raw6| SocketAddr::V6(SocketAddrV6::from(*raw6)))
    } else {
        raw.as_sockaddr_in()
            .map(|raw4| SocketAddr::V4(SocketAddrV4::from(*raw4)))
    };
    source.ok_or_else(|| {
        Error::new(
            ErrorKind::Other,
            "recvmsg returned a source address of the wrong family",
        )
    })
}

/// Finds the packet information control message and returns the
/// destination address and interface index it carries.
fn extract_packet_info(cmsgs: CmsgIterator) -> (Option<IpAddr>, u32) {
    for cmsg in cmsgs {
        match cmsg {
            ControlMessageOwned::Ipv4PacketInfo(info) => {
                let address = Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr));
                return (Some(IpAddr::V4(address)), info.ipi_ifindex as u32);
            }
            ControlMessageOwned::Ipv6PacketInfo(info) => {
                let address = Ipv6Addr::from(info.ipi6_addr.s6_addr);
                return (Some(IpAddr::V6(address)), info.ipi6_ifindex);
            }
            _ => (),
        }
    }
    (None, 0)
}
