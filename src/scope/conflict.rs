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

//! LLMNR conflict detection (RFC 4795 § 4.1).
//!
//! When a response carries a record that disagrees with what another
//! host told us earlier, we announce the disagreement with a query
//! that has the C bit set, so the owners can verify their records.
//! Announcements are queued per resource key and sent together after a
//! random delay of up to [`LLMNR_JITTER_INTERVAL`], which keeps the
//! hosts on a link from all answering at once.

use std::time::{Duration, Instant};

use log::{debug, error};
use rand::Rng;

use super::{Error, Scope};
use crate::manager::Manager;
use crate::packet::{Flags, Packet, PacketWriter, Section};
use crate::protocol::{Protocol, LLMNR_JITTER_INTERVAL};
use crate::rr::ResourceRecord;

impl Scope {
    /// Queues a conflict announcement for `rr`. Only the first record
    /// queued for a given key is kept. The first record queued while
    /// the queue is idle arms the dispatch deadline.
    pub fn notify_conflict(&mut self, manager: &dyn Manager, rr: &ResourceRecord) {
        if self.conflict_queue.contains_key(&rr.key) {
            return;
        }
        self.conflict_queue.insert(rr.key.clone(), rr.clone());
        self.conflict_order.push_back(rr.key.clone());

        if self.conflict_deadline.is_none() {
            let jitter = rand::thread_rng()
                .gen_range(Duration::from_nanos(1)..=LLMNR_JITTER_INTERVAL);
            self.conflict_deadline = Some(manager.now() + jitter);
        }
    }

    /// Sends every queued conflict announcement and disarms the
    /// deadline. Records whose announcement cannot be sent are dropped.
    pub fn dispatch_conflicts(&mut self, manager: &dyn Manager) {
        self.conflict_deadline = None;

        while let Some(key) = self.conflict_order.pop_front() {
            let Some(rr) = self.conflict_queue.remove(&key) else {
                continue;
            };
            let packet = match make_conflict_packet(self.protocol, &rr) {
                Ok(packet) => packet,
                Err(e) => {
                    error!("Failed to build conflict packet for {rr}: {e}.");
                    continue;
                }
            };
            if let Err(e) = self.emit(manager, &packet) {
                debug!("Failed to send conflict packet for {rr}: {e}.");
            }
        }
    }

    /// When the queued conflict announcements are due, if any are
    /// queued.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.conflict_deadline
    }

    /// The number of queued conflict announcements.
    pub fn conflict_queue_len(&self) -> usize {
        self.conflict_queue.len()
    }

    /// Checks the records of an LLMNR response for conflicts. A record
    /// for a key we publish is checked against the zone (which may
    /// withdraw our records) and goes no further. Otherwise, if it
    /// disagrees with what another host told us earlier, an
    /// announcement is queued.
    pub fn check_conflicts(&mut self, manager: &dyn Manager, packet: &Packet) {
        if self.protocol != Protocol::Llmnr || packet.protocol() != Protocol::Llmnr {
            return;
        }
        if packet.rrcount() == 0 || packet.c() || packet.t() {
            return;
        }
        if manager.is_our_packet(packet) {
            return;
        }

        let sections = match packet.extract() {
            Ok(sections) => sections,
            Err(e) => {
                debug!("Failed to extract packet: {e}.");
                return;
            }
        };

        let owner = packet.info().sender.map(|sender| sender.ip());
        let now = manager.now();
        for rr in &sections.answer {
            if self.zone.check_conflicts(rr) {
                continue;
            }
            if self.cache.check_conflicts(rr, owner, now) {
                self.notify_conflict(manager, rr);
            }
        }
    }
}

/// Builds the announcement for a conflict on `rr`: a query with the C
/// bit set, a random ID, `rr`'s key as the question, and `rr` itself
/// as the answer.
pub fn make_conflict_packet(protocol: Protocol, rr: &ResourceRecord) -> Result<Packet, Error> {
    let mut writer = PacketWriter::new(protocol);
    writer.set_id(rand::random());
    writer.set_flags(Flags::conflict());
    writer.add_key(&rr.key);
    writer.add_rr(Section::Answer, rr);
    Ok(writer.finish()?)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::Answer;
    use crate::packet::Rcode;
    use crate::protocol::{Family, SEND_RATELIMIT_BURST};
    use crate::question::Question;
    use crate::scope::{make_reply_packet, ScopeId, ScopeSet};
    use crate::testing::{link, FakeManager};
    use crate::zone::ZoneItemState;

    fn a(name: &str, address: &str) -> ResourceRecord {
        ResourceRecord::address(name, address.parse().unwrap(), 30).unwrap()
    }

    fn response(rr: &ResourceRecord, sender: &str, tentative: bool) -> Packet {
        let answer: Answer = std::iter::once(rr.clone()).collect();
        let mut packet = make_reply_packet(
            Protocol::Llmnr,
            7,
            Rcode::NOERROR,
            Some(&Question::from(rr.key.clone())),
            Some(&answer),
            None,
            tentative,
        )
        .unwrap();
        packet.info_mut().sender = Some(sender.parse().unwrap());
        packet
    }

    fn setup() -> (FakeManager, ScopeSet, ScopeId) {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        let id = scopes
            .add(&manager, Some(link(2)), Protocol::Llmnr, Family::V4)
            .unwrap();
        (manager, scopes, id)
    }

    #[test]
    fn queue_keeps_one_record_per_key_and_one_deadline() {
        let (manager, mut scopes, id) = setup();
        let start = manager.now();
        let scope = scopes.get_mut(id).unwrap();

        scope.notify_conflict(&manager, &a("peer", "192.0.2.1"));
        let deadline = scope.next_deadline().unwrap();
        assert!(deadline > start && deadline <= start + LLMNR_JITTER_INTERVAL);

        scope.notify_conflict(&manager, &a("peer", "192.0.2.2"));
        assert_eq!(scope.conflict_queue_len(), 1);
        assert_eq!(scope.next_deadline(), Some(deadline));

        manager.advance(LLMNR_JITTER_INTERVAL);
        scopes.dispatch_due(&manager);

        let sent = manager.sent();
        assert_eq!(sent.len(), 1);
        let packet = &sent[0].packet;
        assert!(!packet.qr() && packet.c());
        assert_eq!((packet.qdcount(), packet.ancount()), (1, 1));
        let sections = packet.extract().unwrap();
        assert_eq!(sections.answer.records(), [a("peer", "192.0.2.1")]);
        assert!(sections.question.contains(&a("peer", "192.0.2.1").key));

        let scope = scopes.get(id).unwrap();
        assert_eq!(scope.conflict_queue_len(), 0);
        assert_eq!(scope.next_deadline(), None);
    }

    #[test]
    fn nothing_is_dispatched_before_the_deadline() {
        let (manager, mut scopes, id) = setup();
        scopes
            .get_mut(id)
            .unwrap()
            .notify_conflict(&manager, &a("peer", "192.0.2.1"));
        let deadline = scopes.next_deadline().unwrap();
        scopes.dispatch_due(&manager);
        assert!(manager.sent().is_empty());
        manager.advance(deadline - manager.now());
        scopes.dispatch_due(&manager);
        assert_eq!(manager.sent().len(), 1);
    }

    #[test]
    fn deadline_is_always_strictly_after_the_conflict() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        for _ in 0..500 {
            scope.notify_conflict(&manager, &a("peer", "192.0.2.1"));
            let deadline = scope.next_deadline().unwrap();
            assert!(deadline > manager.now());
            assert!(deadline <= manager.now() + LLMNR_JITTER_INTERVAL);
            scope.dispatch_conflicts(&manager);
        }
    }

    #[test]
    fn announcements_go_out_in_arrival_order() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        scope.notify_conflict(&manager, &a("b", "192.0.2.2"));
        scope.notify_conflict(&manager, &a("a", "192.0.2.1"));
        scope.dispatch_conflicts(&manager);

        let names: Vec<_> = manager
            .sent()
            .iter()
            .map(|sent| sent.packet.extract().unwrap().answer.records()[0].key.name().to_owned())
            .collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn failed_sends_still_drain_the_queue() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        let filler = make_conflict_packet(Protocol::Llmnr, &a("x", "192.0.2.9")).unwrap();
        for _ in 0..SEND_RATELIMIT_BURST {
            scope.emit(&manager, &filler).unwrap();
        }
        scope.notify_conflict(&manager, &a("a", "192.0.2.1"));
        scope.notify_conflict(&manager, &a("b", "192.0.2.2"));
        scope.dispatch_conflicts(&manager);
        assert_eq!(scope.conflict_queue_len(), 0);
        assert_eq!(scope.next_deadline(), None);
        assert_eq!(manager.sent().len(), SEND_RATELIMIT_BURST as usize);
    }

    #[test]
    fn cache_disagreements_from_other_hosts_are_announced() {
        let (manager, mut scopes, id) = setup();
        let now = manager.now();
        let scope = scopes.get_mut(id).unwrap();
        scope
            .cache_mut()
            .put(a("peer", "192.0.2.1"), Some("192.0.2.1".parse().unwrap()), now);

        scope.check_conflicts(&manager, &response(&a("peer", "192.0.2.1"), "192.0.2.7:5355", false));
        assert_eq!(scope.conflict_queue_len(), 0);

        scope.check_conflicts(&manager, &response(&a("peer", "192.0.2.7"), "192.0.2.7:5355", false));
        assert_eq!(scope.conflict_queue_len(), 1);
        assert!(scope.next_deadline().is_some());
    }

    #[test]
    fn zone_matches_withdraw_instead_of_announcing() {
        let (manager, mut scopes, id) = setup();
        let now = manager.now();
        let scope = scopes.get_mut(id).unwrap();
        scope.zone_mut().put(a("me", "192.0.2.10"), false);
        scope
            .cache_mut()
            .put(a("me", "192.0.2.1"), Some("192.0.2.1".parse().unwrap()), now);

        scope.check_conflicts(&manager, &response(&a("me", "192.0.2.66"), "192.0.2.66:5355", false));
        assert_eq!(scope.conflict_queue_len(), 0);
        assert_eq!(
            scope.zone().state(&a("me", "192.0.2.10")),
            Some(ZoneItemState::Withdrawn)
        );
    }

    #[test]
    fn tentative_and_own_responses_are_ignored() {
        let (manager, mut scopes, id) = setup();
        let now = manager.now();
        let scope = scopes.get_mut(id).unwrap();
        scope
            .cache_mut()
            .put(a("peer", "192.0.2.1"), Some("192.0.2.1".parse().unwrap()), now);

        scope.check_conflicts(&manager, &response(&a("peer", "192.0.2.7"), "192.0.2.7:5355", true));
        assert_eq!(scope.conflict_queue_len(), 0);

        manager.add_our_address("192.0.2.7".parse().unwrap());
        scope.check_conflicts(&manager, &response(&a("peer", "192.0.2.7"), "192.0.2.7:5355", false));
        assert_eq!(scope.conflict_queue_len(), 0);
    }

    #[test]
    fn teardown_discards_pending_announcements() {
        let (manager, mut scopes, id) = setup();
        scopes
            .get_mut(id)
            .unwrap()
            .notify_conflict(&manager, &a("peer", "192.0.2.1"));
        assert!(scopes.next_deadline().is_some());
        scopes.remove(&manager, id);
        assert_eq!(scopes.next_deadline(), None);
        manager.advance(LLMNR_JITTER_INTERVAL);
        scopes.dispatch_due(&manager);
        assert!(manager.sent().is_empty());
    }
}
