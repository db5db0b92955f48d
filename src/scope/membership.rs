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

//! LLMNR multicast group membership.

use super::{Error, Scope};
use crate::manager::{Manager, SocketKind};
use crate::protocol::Protocol;
use crate::socket;

impl Scope {
    /// Joins (or leaves) the LLMNR multicast group of the scope's
    /// family on the scope's link, using the manager's shared LLMNR
    /// socket. This does nothing for other protocols.
    pub(super) fn llmnr_membership(&self, manager: &dyn Manager, join: bool) -> Result<(), Error> {
        if self.protocol != Protocol::Llmnr {
            return Ok(());
        }
        let (Some(ifindex), Some(kind), Some(group)) = (
            self.ifindex(),
            SocketKind::llmnr(self.family),
            self.family.llmnr_group(),
        ) else {
            return Err(Error::AddressFamilyNotSupported);
        };

        let fd = manager.socket(kind)?;
        if join {
            // The kernel refuses to join a group twice, so clear out
            // any membership left behind by an earlier scope first.
            let _ = socket::set_multicast_membership(fd, group, ifindex, false);
        }
        socket::set_multicast_membership(fd, group, ifindex, join)?;
        Ok(())
    }
}
