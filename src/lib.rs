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

//! Per-link name-resolution scopes for a stub resolver.
//!
//! A host resolves names over several protocols at once: classic
//! unicast DNS to configured servers (globally or per link), and
//! link-local multicast protocols such as LLMNR on each link they are
//! enabled for. This crate models each (link, protocol, family) as a
//! [`Scope`](scope::Scope). Scopes decide which lookups they are good
//! for, send packets under their protocol's rules, answer LLMNR queries
//! from their [`Zone`](zone::Zone) of published records, and detect
//! conflicts between their records and other hosts'.
//!
//! The crate does not own sockets or read the clock; it reaches both
//! through the [`Manager`](manager::Manager) trait, which the
//! `linkscoped` daemon implements over real UDP sockets.

pub mod answer;
pub mod cache;
pub mod manager;
pub mod name;
pub mod packet;
pub mod protocol;
pub mod question;
pub mod ratelimit;
pub mod rr;
pub mod scope;
pub mod socket;
pub mod stream;
pub mod transaction;
pub mod zone;

mod util;

#[cfg(test)]
mod testing;
