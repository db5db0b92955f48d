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

//! Answering LLMNR queries from a scope's zone.

use log::debug;

use super::{Error, Scope};
use crate::answer::Answer;
use crate::manager::{Manager, SocketKind};
use crate::packet::{Flags, Packet, PacketWriter, Rcode, Section, Sections, Transport};
use crate::protocol::{Family, Protocol};
use crate::question::Question;
use crate::stream::PacketStream;
use crate::util::is_link_local;

impl Scope {
    /// Handles an incoming LLMNR query.
    ///
    /// If the zone has anything for the question, a reply is sent: over
    /// `stream` if the query came in on one, otherwise by UDP back to
    /// the sender, subject to the scope's rate limit. Queries with the
    /// C bit set are reports of a conflict with our records and start
    /// verification instead. Nothing is returned; a query we cannot or
    /// should not answer is dropped.
    pub fn process_query(
        &mut self,
        manager: &dyn Manager,
        stream: Option<&mut dyn PacketStream>,
        packet: &Packet,
    ) {
        if self.protocol != Protocol::Llmnr || packet.protocol() != Protocol::Llmnr {
            return;
        }

        let info = packet.info();
        if info.transport == Transport::Udp {
            // Multicast queries only; unicast UDP is not answered.
            let group = packet.family().and_then(Family::llmnr_group);
            if group.is_none() || info.destination != group {
                return;
            }
        }

        let sections = match packet.extract() {
            Ok(sections) => sections,
            Err(e) => {
                debug!("Failed to extract resource records from incoming packet: {e}.");
                return;
            }
        };

        if packet.c() {
            self.verify_conflicts(&sections);
            return;
        }

        let mut lookup = self.zone.lookup(&sections.question);
        if lookup.is_empty() {
            return;
        }
        let sender_is_link_local = info
            .sender
            .map_or(false, |sender| is_link_local(&sender.ip()));
        lookup.answer.order_by_scope(sender_is_link_local);

        let reply = match make_reply_packet(
            Protocol::Llmnr,
            packet.id(),
            Rcode::NOERROR,
            Some(&sections.question),
            Some(&lookup.answer),
            Some(&lookup.soa),
            lookup.tentative,
        ) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Failed to build reply packet: {e}.");
                return;
            }
        };

        if let Some(stream) = stream {
            if let Err(e) = stream.write_packet(&reply) {
                debug!("Failed to enqueue reply packet: {e}.");
            }
            return;
        }

        if !self.ratelimit.test(manager.now()) {
            return;
        }
        let Some(sender) = info.sender else {
            return;
        };
        let Some(kind) = SocketKind::llmnr(Family::of(&sender.ip())) else {
            return;
        };
        if let Err(e) = manager.send(kind, info.ifindex, sender, &reply) {
            debug!("Failed to send reply packet: {e}.");
        }
    }

    /// Starts verification of every record the packet's question and
    /// records refer to.
    fn verify_conflicts(&mut self, sections: &Sections) {
        for key in sections.question.keys() {
            self.zone.verify_conflicts(key);
        }
        for rr in &sections.answer {
            self.zone.verify_conflicts(&rr.key);
        }
    }
}

/// Builds a reply: QR set, T set if `tentative`, the question echoed,
/// `answer` in the answer section, and `soa` in the authority section.
/// A reply with nothing in it at all is refused.
pub fn make_reply_packet(
    protocol: Protocol,
    id: u16,
    rcode: Rcode,
    question: Option<&Question>,
    answer: Option<&Answer>,
    soa: Option<&Answer>,
    tentative: bool,
) -> Result<Packet, Error> {
    let question = question.filter(|q| !q.is_empty());
    let answer = answer.filter(|a| !a.is_empty());
    let soa = soa.filter(|a| !a.is_empty());
    if question.is_none() && answer.is_none() && soa.is_none() {
        return Err(Error::InvalidArgument);
    }

    let mut writer = PacketWriter::new(protocol);
    writer.set_id(id);
    writer.set_flags(Flags::reply(tentative, rcode));
    if let Some(question) = question {
        writer.add_question(question);
    }
    if let Some(answer) = answer {
        writer.add_answer(Section::Answer, answer);
    }
    if let Some(soa) = soa {
        writer.add_answer(Section::Authority, soa);
    }
    Ok(writer.finish()?)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::{IpAddr, SocketAddr};

    use super::*;
    use crate::packet::PacketInfo;
    use crate::protocol::SEND_RATELIMIT_BURST;
    use crate::rr::{Class, ResourceKey, ResourceRecord, Type};
    use crate::scope::{ScopeId, ScopeSet};
    use crate::stream::TcpPacketStream;
    use crate::testing::{link, FakeManager};
    use crate::zone::ZoneItemState;

    fn a(name: &str, address: &str) -> ResourceRecord {
        ResourceRecord::address(name, address.parse().unwrap(), 30).unwrap()
    }

    fn query_packet(rr_type: Type, name: &str, sender: &str, destination: &str, conflict: bool) -> Packet {
        let mut writer = PacketWriter::new(Protocol::Llmnr);
        writer.set_id(0xbeef);
        writer.set_flags(if conflict {
            Flags::conflict()
        } else {
            Flags::query(Protocol::Llmnr)
        });
        writer.add_key(&ResourceKey::new(Class::IN, rr_type, name).unwrap());
        let mut packet = writer.finish().unwrap();
        *packet.info_mut() = PacketInfo {
            sender: Some(sender.parse().unwrap()),
            destination: Some(destination.parse().unwrap()),
            ifindex: 2,
            transport: Transport::Udp,
        };
        packet
    }

    fn llmnr_query(name: &str, sender: &str) -> Packet {
        query_packet(Type::A, name, sender, "224.0.0.252", false)
    }

    fn setup() -> (FakeManager, ScopeSet, ScopeId) {
        let manager = FakeManager::new();
        let mut scopes = ScopeSet::new();
        let id = scopes
            .add(&manager, Some(link(2)), Protocol::Llmnr, Family::V4)
            .unwrap();
        scopes
            .get_mut(id)
            .unwrap()
            .zone_mut()
            .put(a("me", "192.0.2.10"), false);
        (manager, scopes, id)
    }

    #[test]
    fn absent_names_get_no_reply() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        scope.process_query(&manager, None, &llmnr_query("nobody", "192.0.2.77:40000"));
        assert!(manager.sent().is_empty());
    }

    #[test]
    fn known_names_are_answered_to_the_sender() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        scope.process_query(&manager, None, &llmnr_query("ME", "192.0.2.77:40000"));

        let sent = manager.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SocketKind::LlmnrIpv4);
        assert_eq!(sent[0].ifindex, 2);
        assert_eq!(sent[0].dest, "192.0.2.77:40000".parse::<SocketAddr>().unwrap());

        let reply = &sent[0].packet;
        assert_eq!(reply.id(), 0xbeef);
        assert!(reply.qr() && !reply.t() && !reply.c());
        assert_eq!(reply.rcode(), Rcode::NOERROR);
        let sections = reply.extract().unwrap();
        assert_eq!(sections.question.len(), 1);
        assert_eq!(sections.answer.records(), [a("me", "192.0.2.10")]);
    }

    #[test]
    fn probing_records_are_answered_tentatively() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        scope.zone_mut().put(a("new", "192.0.2.11"), true);
        scope.process_query(&manager, None, &llmnr_query("new", "192.0.2.77:40000"));
        assert!(manager.sent()[0].packet.t());
    }

    #[test]
    fn missing_types_are_answered_with_soa() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        let query = query_packet(Type::TXT, "me", "192.0.2.77:40000", "224.0.0.252", false);
        scope.process_query(&manager, None, &query);

        let reply = &manager.sent()[0].packet;
        assert_eq!((reply.ancount(), reply.nscount()), (0, 1));
        let sections = reply.extract().unwrap();
        assert_eq!(sections.answer.records()[0].key.rr_type(), Type::SOA);
    }

    #[test]
    fn link_local_senders_get_link_local_answers_first() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        scope.zone_mut().put(a("me", "169.254.3.3"), false);

        scope.process_query(&manager, None, &llmnr_query("me", "169.254.9.9:5355"));
        scope.process_query(&manager, None, &llmnr_query("me", "192.0.2.77:5355"));

        let first_address = |index: usize| {
            manager.sent()[index].packet.extract().unwrap().answer.records()[0]
                .ip_address()
                .unwrap()
        };
        assert_eq!(first_address(0), "169.254.3.3".parse::<IpAddr>().unwrap());
        assert_eq!(first_address(1), "192.0.2.10".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn unicast_udp_queries_are_ignored() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        let query = query_packet(Type::A, "me", "192.0.2.77:40000", "192.0.2.10", false);
        scope.process_query(&manager, None, &query);
        let wrong_family = query_packet(Type::A, "me", "192.0.2.77:40000", "ff02::1:3", false);
        scope.process_query(&manager, None, &wrong_family);
        assert!(manager.sent().is_empty());
    }

    #[test]
    fn conflict_reports_start_verification() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        let report = query_packet(Type::A, "me", "192.0.2.77:40000", "224.0.0.252", true);
        scope.process_query(&manager, None, &report);
        assert!(manager.sent().is_empty());
        assert_eq!(
            scope.zone().state(&a("me", "192.0.2.10")),
            Some(ZoneItemState::Verifying)
        );
    }

    #[test]
    fn stream_queries_are_answered_on_the_stream() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        let mut query = llmnr_query("me", "192.0.2.77:40000");
        query.info_mut().transport = Transport::Tcp;
        query.info_mut().destination = Some("192.0.2.10".parse().unwrap());

        let mut stream = TcpPacketStream::new(
            Cursor::new(Vec::new()),
            Protocol::Llmnr,
            PacketInfo::default(),
        );
        scope.process_query(&manager, Some(&mut stream), &query);
        assert!(manager.sent().is_empty());
        let written = stream.get_ref().get_ref();
        assert!(written.len() > 2 + crate::packet::HEADER_SIZE);
        assert_eq!(&written[2..4], [0xbe, 0xef]);
    }

    #[test]
    fn replies_share_the_rate_limit_with_emission() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        let query = llmnr_query("me", "192.0.2.77:40000");
        for _ in 0..SEND_RATELIMIT_BURST {
            scope.emit(&manager, &query).unwrap();
        }
        scope.process_query(&manager, None, &query);
        assert_eq!(manager.sent().len(), SEND_RATELIMIT_BURST as usize);

        manager.advance(crate::protocol::SEND_RATELIMIT_INTERVAL);
        scope.process_query(&manager, None, &query);
        assert_eq!(manager.sent().len(), SEND_RATELIMIT_BURST as usize + 1);
    }

    #[test]
    fn malformed_queries_are_dropped() {
        let (manager, mut scopes, id) = setup();
        let scope = scopes.get_mut(id).unwrap();
        let query = llmnr_query("me", "192.0.2.77:40000");
        let mut octets = query.octets().to_vec();
        octets.truncate(octets.len() - 3);
        let truncated = Packet::from_octets(Protocol::Llmnr, octets, query.info().clone()).unwrap();
        scope.process_query(&manager, None, &truncated);
        assert!(manager.sent().is_empty());
    }

    #[test]
    fn empty_replies_are_refused() {
        assert!(matches!(
            make_reply_packet(Protocol::Llmnr, 1, Rcode::NOERROR, None, Some(&Answer::new()), None, false),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn replies_extract_to_what_was_put_in() {
        let question = Question::from(ResourceKey::new(Class::IN, Type::A, "me").unwrap());
        let answer: Answer = [a("me", "192.0.2.10"), a("me", "192.0.2.11")].into_iter().collect();
        let reply = make_reply_packet(
            Protocol::Llmnr,
            42,
            Rcode::NOERROR,
            Some(&question),
            Some(&answer),
            None,
            true,
        )
        .unwrap();
        assert_eq!(reply.id(), 42);
        assert!(reply.qr() && reply.t());
        let sections = reply.extract().unwrap();
        assert_eq!(sections.question, question);
        assert_eq!(sections.answer, answer);
    }
}
