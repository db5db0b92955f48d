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

//! The [`Zone`] of records a scope publishes authoritatively.
//!
//! Each record moves through a small state machine. Records published
//! with probing start out [`Probing`](ZoneItemState::Probing) and are
//! answered with the T (tentative) bit until they are
//! [established](Zone::establish). An established record that a peer
//! asks us to verify becomes [`Verifying`](ZoneItemState::Verifying).
//! A record found to conflict with another host's is
//! [`Withdrawn`](ZoneItemState::Withdrawn) and no longer answered.

use std::collections::HashMap;

use log::{debug, info};

use crate::answer::Answer;
use crate::protocol::LLMNR_DEFAULT_TTL;
use crate::question::Question;
use crate::rr::{ResourceKey, ResourceRecord};

/// The publication state of a zone record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ZoneItemState {
    Probing,
    Established,
    Verifying,
    Withdrawn,
}

#[derive(Clone, Debug)]
struct ZoneItem {
    rr: ResourceRecord,
    state: ZoneItemState,
}

/// A set of authoritative records, indexed by owner name.
#[derive(Clone, Debug, Default)]
pub struct Zone {
    by_name: HashMap<String, Vec<ZoneItem>>,
}

/// The result of [`Zone::lookup`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ZoneLookup {
    /// Records answering the question.
    pub answer: Answer,

    /// SOA records for names we know that have no records of the
    /// requested type.
    pub soa: Answer,

    /// Whether any answering record is still being probed.
    pub tentative: bool,
}

impl ZoneLookup {
    pub fn is_empty(&self) -> bool {
        self.answer.is_empty() && self.soa.is_empty()
    }
}

fn index_of(key: &ResourceKey) -> String {
    key.name().to_ascii_lowercase()
}

impl Zone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `rr`. If `probe` is false, it is established at once.
    /// Returns false if the record was already present.
    pub fn put(&mut self, rr: ResourceRecord, probe: bool) -> bool {
        let items = self.by_name.entry(index_of(&rr.key)).or_default();
        if let Some(item) = items.iter_mut().find(|item| item.rr.same_data(&rr)) {
            if item.state != ZoneItemState::Withdrawn {
                return false;
            }
            item.state = initial_state(probe);
            return true;
        }
        items.push(ZoneItem {
            rr,
            state: initial_state(probe),
        });
        true
    }

    /// Removes `rr`, returning whether it was present.
    pub fn remove(&mut self, rr: &ResourceRecord) -> bool {
        let index = index_of(&rr.key);
        let Some(items) = self.by_name.get_mut(&index) else {
            return false;
        };
        let before = items.len();
        items.retain(|item| !item.rr.same_data(rr));
        let removed = items.len() != before;
        if items.is_empty() {
            self.by_name.remove(&index);
        }
        removed
    }

    /// Removes all records.
    pub fn flush(&mut self) {
        self.by_name.clear();
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Returns the state of `rr`, if it is in the zone.
    pub fn state(&self, rr: &ResourceRecord) -> Option<ZoneItemState> {
        self.by_name
            .get(&index_of(&rr.key))?
            .iter()
            .find(|item| item.rr.same_data(rr))
            .map(|item| item.state)
    }

    /// Marks every probing or verifying record for `key` as
    /// established. Returns the number of records changed.
    pub fn establish(&mut self, key: &ResourceKey) -> usize {
        self.items_for_key(key)
            .filter(|item| {
                matches!(
                    item.state,
                    ZoneItemState::Probing | ZoneItemState::Verifying
                )
            })
            .map(|item| item.state = ZoneItemState::Established)
            .count()
    }

    /// Answers `question` from the zone.
    pub fn lookup(&self, question: &Question) -> ZoneLookup {
        let mut result = ZoneLookup::default();
        for key in question.keys() {
            let live: Vec<_> = self
                .by_name
                .get(&index_of(key))
                .into_iter()
                .flatten()
                .filter(|item| item.state != ZoneItemState::Withdrawn)
                .collect();

            let mut found = false;
            for item in live.iter().filter(|item| key.matches(&item.rr.key)) {
                found = true;
                result.tentative |= item.state == ZoneItemState::Probing;
                result.answer.add(item.rr.clone());
            }

            if !found && !live.is_empty() {
                // The name exists, just not with this type.
                if let Ok(soa) = ResourceRecord::soa(key.name(), LLMNR_DEFAULT_TTL) {
                    result.soa.add(soa);
                }
            }
        }
        result
    }

    /// Checks a record another host announced against the zone.
    /// Returns false if we publish nothing for its key. Otherwise
    /// returns true, first withdrawing our records for the key if none
    /// of them carries the same data.
    pub fn check_conflicts(&mut self, rr: &ResourceRecord) -> bool {
        let mut ours: Vec<_> = self
            .items_for_key(&rr.key)
            .filter(|item| item.state != ZoneItemState::Withdrawn)
            .collect();
        if ours.is_empty() {
            return false;
        }
        if ours.iter().any(|item| item.rr.rdata == rr.rdata) {
            return true;
        }
        for item in ours.iter_mut() {
            info!("Detected conflict on {}, withdrawing.", item.rr);
            item.state = ZoneItemState::Withdrawn;
        }
        true
    }

    /// Starts verification of our established records for `key`, in
    /// response to another host reporting a conflict. Returns the
    /// number of records now verifying.
    pub fn verify_conflicts(&mut self, key: &ResourceKey) -> usize {
        self.items_for_key(key)
            .filter(|item| item.state == ZoneItemState::Established)
            .map(|item| {
                debug!("Verifying {} after conflict report.", item.rr);
                item.state = ZoneItemState::Verifying;
            })
            .count()
    }

    fn items_for_key<'a>(&'a mut self, key: &'a ResourceKey) -> impl Iterator<Item = &'a mut ZoneItem> {
        self.by_name
            .get_mut(&index_of(key))
            .into_iter()
            .flatten()
            .filter(move |item| item.rr.key == *key)
    }
}

fn initial_state(probe: bool) -> ZoneItemState {
    if probe {
        ZoneItemState::Probing
    } else {
        ZoneItemState::Established
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::{Class, Type};

    fn a(address: &str) -> ResourceRecord {
        ResourceRecord::address("host", address.parse().unwrap(), 30).unwrap()
    }

    fn question(rr_type: Type, name: &str) -> Question {
        Question::from(ResourceKey::new(Class::IN, rr_type, name).unwrap())
    }

    #[test]
    fn lookup_finds_records_case_insensitively() {
        let mut zone = Zone::new();
        zone.put(a("192.0.2.1"), false);
        let result = zone.lookup(&question(Type::A, "HOST."));
        assert_eq!(result.answer.records(), [a("192.0.2.1")]);
        assert!(result.soa.is_empty());
        assert!(!result.tentative);
    }

    #[test]
    fn lookup_of_missing_type_returns_soa() {
        let mut zone = Zone::new();
        zone.put(a("192.0.2.1"), false);
        let result = zone.lookup(&question(Type::AAAA, "host"));
        assert!(result.answer.is_empty());
        assert_eq!(result.soa.len(), 1);
        assert_eq!(result.soa.records()[0].key.rr_type(), Type::SOA);
    }

    #[test]
    fn lookup_of_unknown_name_is_empty() {
        let mut zone = Zone::new();
        zone.put(a("192.0.2.1"), false);
        assert!(zone.lookup(&question(Type::A, "other")).is_empty());
    }

    #[test]
    fn probing_records_are_tentative_until_established() {
        let mut zone = Zone::new();
        zone.put(a("192.0.2.1"), true);
        assert!(zone.lookup(&question(Type::A, "host")).tentative);
        assert_eq!(zone.establish(&a("192.0.2.1").key), 1);
        assert!(!zone.lookup(&question(Type::A, "host")).tentative);
    }

    #[test]
    fn conflicting_data_withdraws_our_records() {
        let mut zone = Zone::new();
        zone.put(a("192.0.2.1"), false);
        assert!(zone.check_conflicts(&a("192.0.2.1")));
        assert_eq!(zone.state(&a("192.0.2.1")), Some(ZoneItemState::Established));

        assert!(zone.check_conflicts(&a("192.0.2.99")));
        assert_eq!(zone.state(&a("192.0.2.1")), Some(ZoneItemState::Withdrawn));
        assert!(zone.lookup(&question(Type::A, "host")).is_empty());
    }

    #[test]
    fn unknown_keys_are_not_ours() {
        let mut zone = Zone::new();
        zone.put(a("192.0.2.1"), false);
        let other = ResourceRecord::address("other", "192.0.2.1".parse().unwrap(), 30).unwrap();
        assert!(!zone.check_conflicts(&other));
    }

    #[test]
    fn verify_moves_established_records_to_verifying() {
        let mut zone = Zone::new();
        zone.put(a("192.0.2.1"), false);
        assert_eq!(zone.verify_conflicts(&a("192.0.2.1").key), 1);
        assert_eq!(zone.state(&a("192.0.2.1")), Some(ZoneItemState::Verifying));
        assert_eq!(zone.verify_conflicts(&a("192.0.2.1").key), 0);
    }

    #[test]
    fn put_and_remove() {
        let mut zone = Zone::new();
        assert!(zone.put(a("192.0.2.1"), false));
        assert!(!zone.put(a("192.0.2.1"), false));
        assert!(zone.put(a("192.0.2.2"), false));
        assert_eq!(zone.len(), 2);
        assert!(zone.remove(&a("192.0.2.1")));
        assert!(!zone.remove(&a("192.0.2.1")));
        zone.flush();
        assert!(zone.is_empty());
    }
}
