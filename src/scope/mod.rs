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

//! Name-resolution scopes.
//!
//! A [`Scope`] is the unit of resolution state for one protocol on one
//! link (or, for classic DNS, possibly the whole system), restricted to
//! an address family. It decides which lookups it is good for
//! ([`Scope::good_domain`]), sends packets under its protocol's rules
//! ([`Scope::emit`]), answers LLMNR queries from its zone
//! ([`Scope::process_query`]), and runs LLMNR conflict detection for
//! the records it publishes ([`Scope::check_conflicts`]).
//!
//! Scopes live in a [`ScopeSet`], which guarantees that there is at
//! most one scope for each (link, protocol, family) and tears scopes
//! down in order when they are removed.
//!
//! Nothing in here reads the clock or owns a socket; both are reached
//! through the [`Manager`]. Deferred work (conflict announcements) is
//! exposed as a deadline ([`ScopeSet::next_deadline`]) for the event
//! loop to wait on.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use log::debug;
use rand::Rng;
use slab::Slab;

use crate::cache::Cache;
use crate::manager::{Link, Manager};
use crate::protocol::{Family, Protocol, SEND_RATELIMIT_BURST, SEND_RATELIMIT_INTERVAL};
use crate::question::Question;
use crate::ratelimit::RateLimit;
use crate::rr::{ResourceKey, ResourceRecord};
use crate::transaction::{Transaction, TransactionId, TransactionState};
use crate::zone::Zone;

mod conflict;
mod domain;
mod emit;
mod error;
mod membership;
mod query;

pub use conflict::make_conflict_packet;
pub use domain::{LookupFlags, ScopeMatch};
pub use error::Error;
pub use query::make_reply_packet;

////////////////////////////////////////////////////////////////////////
// SCOPES                                                             //
////////////////////////////////////////////////////////////////////////

/// How many random message IDs a new transaction tries before falling
/// back to a scan.
const RANDOM_ID_ATTEMPTS: usize = 64;

/// Identifies a scope within its [`ScopeSet`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ScopeId(usize);

/// Resolution state for one (link, protocol, family).
pub struct Scope {
    id: ScopeId,
    link: Option<Link>,
    protocol: Protocol,
    family: Family,
    domains: Vec<String>,

    transactions: Slab<Transaction>,
    transaction_order: VecDeque<usize>,
    packet_ids: HashMap<u16, usize>,

    zone: Zone,
    cache: Cache,

    conflict_queue: HashMap<ResourceKey, ResourceRecord>,
    conflict_order: VecDeque<ResourceKey>,
    conflict_deadline: Option<Instant>,

    ratelimit: RateLimit,
}

impl Scope {
    fn new(
        manager: &dyn Manager,
        id: ScopeId,
        link: Option<Link>,
        protocol: Protocol,
        family: Family,
    ) -> Self {
        let scope = Self {
            id,
            link,
            protocol,
            family,
            domains: Vec::new(),
            transactions: Slab::new(),
            transaction_order: VecDeque::new(),
            packet_ids: HashMap::new(),
            zone: Zone::new(),
            cache: Cache::new(),
            conflict_queue: HashMap::new(),
            conflict_order: VecDeque::new(),
            conflict_deadline: None,
            ratelimit: RateLimit::new(SEND_RATELIMIT_INTERVAL, SEND_RATELIMIT_BURST),
        };

        if let Err(e) = scope.llmnr_membership(manager, true) {
            debug!("Failed to join LLMNR multicast group on {}: {}", scope.link_name(), e);
        }
        debug!(
            "New scope on link {}, protocol {}, family {}",
            scope.link_name(),
            protocol,
            family
        );
        scope
    }

    /// Tears the scope down: every transaction is aborted and let go,
    /// multicast membership is dropped, and the zone, cache, and
    /// pending conflict announcements are discarded. The aborted
    /// transactions are returned to the caller.
    fn free(mut self, manager: &dyn Manager) -> Vec<Transaction> {
        debug!(
            "Removing scope on link {}, protocol {}, family {}",
            self.link_name(),
            self.protocol,
            self.family
        );

        let mut aborted = Vec::with_capacity(self.transaction_order.len());
        for key in self.transaction_order.drain(..) {
            let mut transaction = self.transactions.remove(key);
            transaction.complete(TransactionState::Aborted);
            transaction.detach();
            aborted.push(transaction);
        }
        self.packet_ids.clear();

        if let Err(e) = self.llmnr_membership(manager, false) {
            debug!("Failed to leave LLMNR multicast group on {}: {}", self.link_name(), e);
        }

        self.zone.flush();
        self.cache.flush();
        self.conflict_queue.clear();
        self.conflict_order.clear();
        self.conflict_deadline = None;
        aborted
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The link the scope is bound to, or `None` for a global scope.
    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    pub fn ifindex(&self) -> Option<u32> {
        self.link.as_ref().map(|link| link.ifindex)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// The domains routed to this scope unconditionally.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn set_domains(&mut self, domains: Vec<String>) {
        self.domains = domains;
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn zone_mut(&mut self) -> &mut Zone {
        &mut self.zone
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    fn link_name(&self) -> &str {
        self.link.as_ref().map_or("*", |link| link.name.as_str())
    }

    ////////////////////////////////////////////////////////////////////
    // TRANSACTIONS                                                   //
    ////////////////////////////////////////////////////////////////////

    /// Creates a transaction for `question` with a random message ID
    /// not used by any other transaction of the scope.
    pub fn add_transaction(&mut self, question: Question) -> Result<TransactionId, Error> {
        let packet_id = self.free_packet_id().ok_or(Error::NoFreeTransactionId)?;
        let key = self
            .transactions
            .insert(Transaction::new(self.id, packet_id, question));
        self.transaction_order.push_front(key);
        self.packet_ids.insert(packet_id, key);
        Ok(TransactionId(key))
    }

    /// Picks an unused message ID: a few random guesses, then a scan
    /// from a random starting point.
    fn free_packet_id(&self) -> Option<u16> {
        let mut rng = rand::thread_rng();
        for _ in 0..RANDOM_ID_ATTEMPTS {
            let candidate: u16 = rng.gen();
            if !self.packet_ids.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        let start: u16 = rng.gen();
        (0..=u16::MAX)
            .map(|offset| start.wrapping_add(offset))
            .find(|candidate| !self.packet_ids.contains_key(candidate))
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(id.0)
    }

    pub fn transaction_mut(&mut self, id: TransactionId) -> Option<&mut Transaction> {
        self.transactions.get_mut(id.0)
    }

    /// Removes a transaction from the scope, handing it back detached.
    pub fn remove_transaction(&mut self, id: TransactionId) -> Option<Transaction> {
        let mut transaction = self.transactions.try_remove(id.0)?;
        self.transaction_order.retain(|&key| key != id.0);
        self.packet_ids.remove(&transaction.id());
        transaction.detach();
        Some(transaction)
    }

    /// Iterates over the scope's transactions, newest first.
    pub fn transactions(&self) -> impl Iterator<Item = (TransactionId, &Transaction)> + '_ {
        self.transaction_order
            .iter()
            .map(move |&key| (TransactionId(key), &self.transactions[key]))
    }

    /// Finds the transaction that sent message ID `packet_id`.
    pub fn transaction_by_packet_id(&self, packet_id: u16) -> Option<TransactionId> {
        self.packet_ids.get(&packet_id).map(|&key| TransactionId(key))
    }

    /// Finds an existing transaction whose question covers `question`,
    /// newest first. Unless `cache_ok`, transactions that completed
    /// without receiving a packet (that is, from cached data) are not
    /// reused.
    pub fn find_transaction(&self, question: &Question, cache_ok: bool) -> Option<TransactionId> {
        self.transactions()
            .filter(|(_, transaction)| {
                cache_ok
                    || !matches!(
                        transaction.state(),
                        TransactionState::Success | TransactionState::Failure
                    )
                    || transaction.received().is_some()
            })
            .find(|(_, transaction)| transaction.question().is_superset(question))
            .map(|(id, _)| id)
    }
}

////////////////////////////////////////////////////////////////////////
// SCOPE SETS                                                         //
////////////////////////////////////////////////////////////////////////

/// The set of all scopes, with at most one per (link, protocol,
/// family).
#[derive(Default)]
pub struct ScopeSet {
    scopes: Slab<Scope>,
}

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the scope for (`link`, `protocol`, `family`), creating it
    /// if needed. LLMNR and mDNS scopes must be bound to a link and to
    /// a concrete family.
    pub fn add(
        &mut self,
        manager: &dyn Manager,
        link: Option<Link>,
        protocol: Protocol,
        family: Family,
    ) -> Result<ScopeId, Error> {
        if protocol != Protocol::Dns {
            if link.is_none() {
                return Err(Error::InvalidArgument);
            }
            if family == Family::Any {
                return Err(Error::AddressFamilyNotSupported);
            }
        }
        let ifindex = link.as_ref().map(|link| link.ifindex);
        if let Some(id) = self.find(ifindex, protocol, family) {
            return Ok(id);
        }
        let entry = self.scopes.vacant_entry();
        let id = ScopeId(entry.key());
        entry.insert(Scope::new(manager, id, link, protocol, family));
        Ok(id)
    }

    /// Finds the scope for (`ifindex`, `protocol`, `family`).
    pub fn find(&self, ifindex: Option<u32>, protocol: Protocol, family: Family) -> Option<ScopeId> {
        self.scopes
            .iter()
            .find(|(_, scope)| {
                scope.ifindex() == ifindex && scope.protocol == protocol && scope.family == family
            })
            .map(|(key, _)| ScopeId(key))
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(id.0)
    }

    /// Removes and tears down a scope, returning its aborted
    /// transactions.
    pub fn remove(&mut self, manager: &dyn Manager, id: ScopeId) -> Option<Vec<Transaction>> {
        self.scopes.try_remove(id.0).map(|scope| scope.free(manager))
    }

    /// Removes and tears down every scope bound to link `ifindex`.
    pub fn remove_link(&mut self, manager: &dyn Manager, ifindex: u32) -> Vec<Transaction> {
        let ids: Vec<_> = self
            .iter()
            .filter(|scope| scope.ifindex() == Some(ifindex))
            .map(Scope::id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.remove(manager, id))
            .flatten()
            .collect()
    }

    /// Tears down every scope.
    pub fn clear(&mut self, manager: &dyn Manager) -> Vec<Transaction> {
        let ids: Vec<_> = self.iter().map(Scope::id).collect();
        ids.into_iter()
            .filter_map(|id| self.remove(manager, id))
            .flatten()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope> + '_ {
        self.scopes.iter().map(|(_, scope)| scope)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Scope> + '_ {
        self.scopes.iter_mut().map(|(_, scope)| scope)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Picks the scopes a lookup of `domain` should go to. If any scope
    /// is certain about the domain, all certain scopes are used;
    /// otherwise all scopes that might be able to resolve it.
    pub fn route(&self, ifindex: u32, flags: LookupFlags, domain: &str) -> Vec<ScopeId> {
        let matches: Vec<_> = self
            .iter()
            .map(|scope| (scope.id, scope.good_domain(ifindex, flags, domain)))
            .collect();
        let wanted = if matches.iter().any(|(_, m)| *m == ScopeMatch::Yes) {
            ScopeMatch::Yes
        } else {
            ScopeMatch::Maybe
        };
        matches
            .into_iter()
            .filter(|(_, m)| *m == wanted)
            .map(|(id, _)| id)
            .collect()
    }

    /// The earliest time at which some scope has deferred work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.iter().filter_map(Scope::next_deadline).min()
    }

    /// Runs the deferred work that is due.
    pub fn dispatch_due(&mut self, manager: &dyn Manager) {
        let now = manager.now();
        for scope in self.iter_mut() {
            if scope.next_deadline().map_or(false, |deadline| deadline <= now) {
                scope.dispatch_conflicts(manager);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::{Class, Type};
    use crate::testing::{link, FakeManager};

    fn question(name: &str) -> Question {
        Question::from(ResourceKey::new(Class::IN, Type::A, name).unwrap())
    }

    #[test]
    fn scope_set_keeps_one_scope_per_tuple() {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        let a = scopes
            .add(&manager, Some(link(2)), Protocol::Llmnr, Family::V4)
            .unwrap();
        let b = scopes
            .add(&manager, Some(link(2)), Protocol::Llmnr, Family::V4)
            .unwrap();
        let c = scopes
            .add(&manager, Some(link(2)), Protocol::Llmnr, Family::V6)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(scopes.len(), 2);
    }

    #[test]
    fn multicast_scopes_need_a_link_and_family() {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        assert!(matches!(
            scopes.add(&manager, None, Protocol::Llmnr, Family::V4),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            scopes.add(&manager, Some(link(2)), Protocol::Llmnr, Family::Any),
            Err(Error::AddressFamilyNotSupported)
        ));
        assert!(scopes.add(&manager, None, Protocol::Dns, Family::Any).is_ok());
    }

    #[test]
    fn find_transaction_returns_newest_superset() {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        let id = scopes.add(&manager, None, Protocol::Dns, Family::Any).unwrap();
        let scope = scopes.get_mut(id).unwrap();

        let older = scope.add_transaction(question("host")).unwrap();
        let newer = scope.add_transaction(question("host")).unwrap();
        assert_ne!(
            scope.transaction(older).unwrap().id(),
            scope.transaction(newer).unwrap().id()
        );
        assert_eq!(scope.find_transaction(&question("HOST."), false), Some(newer));
        assert_eq!(scope.find_transaction(&question("other"), true), None);
    }

    #[test]
    fn find_transaction_skips_cache_answers_unless_allowed() {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        let id = scopes.add(&manager, None, Protocol::Dns, Family::Any).unwrap();
        let scope = scopes.get_mut(id).unwrap();

        let cached = scope.add_transaction(question("host")).unwrap();
        scope
            .transaction_mut(cached)
            .unwrap()
            .complete(TransactionState::Success);

        assert_eq!(scope.find_transaction(&question("host"), false), None);
        assert_eq!(scope.find_transaction(&question("host"), true), Some(cached));

        let pending = scope.add_transaction(question("host")).unwrap();
        scope.transaction_mut(pending).unwrap().start();
        assert_eq!(scope.find_transaction(&question("host"), false), Some(pending));
    }

    #[test]
    fn teardown_aborts_and_detaches_transactions() {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        let id = scopes
            .add(&manager, Some(link(2)), Protocol::Llmnr, Family::V4)
            .unwrap();
        let scope = scopes.get_mut(id).unwrap();
        scope.add_transaction(question("a")).unwrap();
        scope.add_transaction(question("b")).unwrap();
        scope
            .zone_mut()
            .put(ResourceRecord::address("me", "169.254.1.1".parse().unwrap(), 30).unwrap(), false);

        let aborted = scopes.remove(&manager, id).unwrap();
        assert_eq!(aborted.len(), 2);
        for transaction in &aborted {
            assert_eq!(transaction.state(), TransactionState::Aborted);
            assert_eq!(transaction.scope(), None);
        }
        assert!(scopes.get(id).is_none());
        assert!(scopes.remove(&manager, id).is_none());
    }

    #[test]
    fn removed_transactions_are_detached() {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        let id = scopes.add(&manager, None, Protocol::Dns, Family::Any).unwrap();
        let scope = scopes.get_mut(id).unwrap();
        let transaction = scope.add_transaction(question("host")).unwrap();
        let removed = scope.remove_transaction(transaction).unwrap();
        assert_eq!(removed.scope(), None);
        assert!(scope.transaction(transaction).is_none());
        assert_eq!(scope.transactions().count(), 0);
        assert_eq!(scope.transaction_by_packet_id(removed.id()), None);
    }

    #[test]
    fn add_transaction_fails_once_every_id_is_taken() {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        let id = scopes.add(&manager, None, Protocol::Dns, Family::Any).unwrap();
        let scope = scopes.get_mut(id).unwrap();
        let question = question("host");

        let mut first = None;
        for _ in 0..=u16::MAX {
            let transaction = scope.add_transaction(question.clone()).unwrap();
            first.get_or_insert(transaction);
        }
        assert!(matches!(
            scope.add_transaction(question.clone()),
            Err(Error::NoFreeTransactionId)
        ));

        let freed = scope.remove_transaction(first.unwrap()).unwrap().id();
        let again = scope.add_transaction(question).unwrap();
        assert_eq!(scope.transaction(again).unwrap().id(), freed);
    }

    #[test]
    fn remove_link_only_touches_that_link() {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        scopes
            .add(&manager, Some(link(2)), Protocol::Llmnr, Family::V4)
            .unwrap();
        scopes
            .add(&manager, Some(link(2)), Protocol::Llmnr, Family::V6)
            .unwrap();
        let other = scopes
            .add(&manager, Some(link(3)), Protocol::Llmnr, Family::V4)
            .unwrap();
        scopes.remove_link(&manager, 2);
        assert_eq!(scopes.len(), 1);
        assert!(scopes.get(other).is_some());
    }
}
