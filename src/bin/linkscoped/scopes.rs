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

//! Builds the scopes described by the configuration and feeds them
//! incoming packets.

use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};

use linkscope::manager::{Link, Manager};
use linkscope::name;
use linkscope::packet::Packet;
use linkscope::protocol::{Family, Protocol, LLMNR_DEFAULT_TTL};
use linkscope::rr::ResourceRecord;
use linkscope::scope::{Scope, ScopeSet};
use linkscope::transaction::{Transaction, TransactionState};

use crate::config::{Config, LinkConfig};
use crate::manager::UdpManager;

////////////////////////////////////////////////////////////////////////
// SET-UP                                                             //
////////////////////////////////////////////////////////////////////////

/// Creates the manager and the scopes for `config`: a global DNS scope,
/// a DNS scope for each link with its own servers or domains, and a
/// pair of LLMNR scopes for each LLMNR link. Each LLMNR scope publishes
/// the host name for the link's addresses of its family.
pub fn set_up(config: &Config) -> Result<(UdpManager, ScopeSet)> {
    let hostname = match config.hostname {
        Some(ref name) => name.0.clone(),
        None => system_hostname()?,
    };

    let mut manager = UdpManager::new(config.dns_servers.clone(), config.mtu);
    let mut links = Vec::with_capacity(config.links.len());
    for link_config in &config.links {
        let (link, addresses) = resolve_link(link_config)
            .with_context(|| format!("failed to set up link {}", link_config.name))?;
        manager.add_link(link.ifindex, link_config.dns_servers.clone(), &addresses);
        links.push((link, link_config, addresses));
    }

    let mut scopes = ScopeSet::new();
    let global = scopes
        .add(&manager, None, Protocol::Dns, Family::Any)
        .context("failed to create the global DNS scope")?;
    if let Some(scope) = scopes.get_mut(global) {
        scope.set_domains(config.domains.iter().map(|d| d.0.clone()).collect());
    }

    for (link, link_config, addresses) in links {
        if !link_config.dns_servers.is_empty() || !link_config.domains.is_empty() {
            let id = scopes
                .add(&manager, Some(link.clone()), Protocol::Dns, Family::Any)
                .context("failed to create a DNS scope")?;
            if let Some(scope) = scopes.get_mut(id) {
                scope.set_domains(link_config.domains.iter().map(|d| d.0.clone()).collect());
            }
        }

        if link_config.llmnr {
            for family in [Family::V4, Family::V6] {
                let id = scopes
                    .add(&manager, Some(link.clone()), Protocol::Llmnr, family)
                    .context("failed to create an LLMNR scope")?;
                if let Some(scope) = scopes.get_mut(id) {
                    let published = publish_hostname(
                        scope,
                        &hostname,
                        addresses.iter().filter(|a| Family::of(a) == family),
                    )?;
                    info!(
                        "Publishing {} on {} over LLMNR/{} ({} records).",
                        hostname, link.name, family, published
                    );
                }
            }
        }
    }

    Ok((manager, scopes))
}

/// Puts address and reverse-mapping records for `hostname` into the
/// scope's zone. Returns the number of records published.
fn publish_hostname<'a>(
    scope: &mut Scope,
    hostname: &str,
    addresses: impl Iterator<Item = &'a IpAddr>,
) -> Result<usize> {
    let mut published = 0;
    for &address in addresses {
        let forward = ResourceRecord::address(hostname, address, LLMNR_DEFAULT_TTL)
            .context("invalid host name")?;
        let reverse = ResourceRecord::ptr(&name::reverse(address), hostname, LLMNR_DEFAULT_TTL)
            .context("invalid host name")?;
        for rr in [forward, reverse] {
            if scope.zone_mut().put(rr, false) {
                published += 1;
            }
        }
    }
    Ok(published)
}

/// Returns the first label of the system host name.
fn system_hostname() -> Result<String> {
    let hostname = nix::unistd::gethostname()
        .context("failed to get the system host name")?
        .into_string()
        .map_err(|_| anyhow!("the system host name is not valid UTF-8"))?;
    let first = hostname.split('.').next().unwrap_or_default();
    name::normalize(first).context("the system host name is not a valid domain name")
}

/// Finds the interface index of a link (unless configured) and its
/// addresses (unless configured).
fn resolve_link(config: &LinkConfig) -> Result<(Link, Vec<IpAddr>)> {
    let ifindex = match config.ifindex {
        Some(ifindex) => ifindex,
        None => nix::net::if_::if_nametoindex(config.name.as_str())
            .context("failed to find the interface index")?,
    };
    let addresses = if config.addresses.is_empty() {
        interface_addresses(&config.name)?
    } else {
        config.addresses.clone()
    };
    let link = Link {
        ifindex,
        name: config.name.clone(),
        mtu: config.mtu,
    };
    Ok((link, addresses))
}

fn interface_addresses(interface: &str) -> Result<Vec<IpAddr>> {
    let addresses = nix::ifaddrs::getifaddrs().context("failed to list interface addresses")?;
    Ok(addresses
        .filter(|ifaddr| ifaddr.interface_name == interface)
        .filter_map(|ifaddr| ifaddr.address)
        .filter_map(|address| {
            if let Some(sin) = address.as_sockaddr_in() {
                Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()))
            } else {
                address
                    .as_sockaddr_in6()
                    .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
            }
        })
        .collect())
}

////////////////////////////////////////////////////////////////////////
// INCOMING PACKETS                                                   //
////////////////////////////////////////////////////////////////////////

/// Hands an incoming packet to the scope it belongs to. LLMNR queries
/// are answered; LLMNR responses are checked for conflicts; responses
/// of either protocol complete the matching transaction.
pub fn handle_packet(manager: &UdpManager, scopes: &mut ScopeSet, packet: Packet) {
    match packet.protocol() {
        Protocol::Llmnr => {
            let ifindex = packet.info().ifindex;
            let Some(family) = packet.family() else {
                return;
            };
            let Some(scope) = scopes
                .find(Some(ifindex), Protocol::Llmnr, family)
                .and_then(|id| scopes.get_mut(id))
            else {
                debug!("Dropping LLMNR packet received on link {ifindex} without a scope.");
                return;
            };
            if packet.qr() {
                scope.check_conflicts(manager, &packet);
                complete_transaction(manager, scope, packet);
            } else {
                scope.process_query(manager, None, &packet);
            }
        }

        Protocol::Dns => {
            if !packet.qr() {
                return;
            }
            let id = scopes
                .iter()
                .filter(|scope| scope.protocol() == Protocol::Dns)
                .find(|scope| scope.transaction_by_packet_id(packet.id()).is_some())
                .map(Scope::id);
            if let Some(scope) = id.and_then(|id| scopes.get_mut(id)) {
                complete_transaction(manager, scope, packet);
            }
        }

        Protocol::Mdns => (),
    }
}

/// Completes the pending transaction `packet` responds to, caching the
/// records it carries. Responses to transactions that are not pending
/// (late or duplicate ones) are dropped without touching the cache.
pub fn complete_transaction(manager: &dyn Manager, scope: &mut Scope, packet: Packet) {
    let Some(sender) = packet.info().sender.map(|sender| sender.ip()) else {
        return;
    };
    if !scope.good_dns_server(manager, &sender) {
        debug!("Dropping response from unexpected server {sender}.");
        return;
    }
    let Some(id) = scope.transaction_by_packet_id(packet.id()) else {
        return;
    };
    match scope.transaction(id).map(Transaction::state) {
        Some(TransactionState::Pending) => (),
        Some(state) => {
            debug!("Dropping response {} to a transaction in state {state}.", packet.id());
            return;
        }
        None => return,
    }

    match packet.extract() {
        Ok(sections) => scope
            .cache_mut()
            .put_answer(&sections.answer, Some(sender), manager.now()),
        Err(e) => {
            debug!("Dropping malformed response from {sender}: {e}.");
            return;
        }
    }
    if let Some(transaction) = scope.transaction_mut(id) {
        transaction.receive(packet);
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use linkscope::packet::{Flags, PacketWriter, Rcode, Section};
    use linkscope::question::Question;
    use linkscope::rr::{Class, ResourceKey, Type};

    const SERVER: &str = "192.0.2.53";

    fn key() -> ResourceKey {
        ResourceKey::new(Class::IN, Type::A, "www.example.com").unwrap()
    }

    fn response(id: u16, address: &str) -> Packet {
        let mut writer = PacketWriter::new(Protocol::Dns);
        writer.set_id(id);
        writer.set_flags(Flags::reply(false, Rcode::NOERROR));
        writer.add_key(&key());
        let rr = ResourceRecord::address("www.example.com", address.parse().unwrap(), 300).unwrap();
        writer.add_rr(Section::Answer, &rr);
        let mut packet = writer.finish().unwrap();
        packet.info_mut().sender = Some(SocketAddr::new(SERVER.parse().unwrap(), 53));
        packet
    }

    fn cached(scope: &mut Scope, manager: &UdpManager) -> Vec<String> {
        scope
            .cache_mut()
            .lookup(&key(), manager.now())
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn only_pending_transactions_take_responses() {
        let manager = UdpManager::new(vec![SERVER.parse().unwrap()], 1500);
        let mut scopes = ScopeSet::new();
        let id = scopes.add(&manager, None, Protocol::Dns, Family::Any).unwrap();
        let scope = scopes.get_mut(id).unwrap();
        let transaction = scope.add_transaction(Question::from(key())).unwrap();
        let packet_id = scope.transaction(transaction).unwrap().id();

        // Not sent yet.
        complete_transaction(&manager, scope, response(packet_id, "192.0.2.1"));
        assert!(scope.cache().is_empty());
        assert_eq!(scope.transaction(transaction).unwrap().state(), TransactionState::Null);

        scope.transaction_mut(transaction).unwrap().start();
        complete_transaction(&manager, scope, response(packet_id, "192.0.2.1"));
        assert_eq!(scope.transaction(transaction).unwrap().state(), TransactionState::Success);
        assert_eq!(cached(scope, &manager).len(), 1);

        // A late duplicate with other data changes nothing.
        complete_transaction(&manager, scope, response(packet_id, "192.0.2.2"));
        let records = cached(scope, &manager);
        assert_eq!(records.len(), 1);
        assert!(records[0].contains("192.0.2.1"));
    }

    #[test]
    fn responses_from_unknown_servers_are_dropped() {
        let manager = UdpManager::new(vec![SERVER.parse().unwrap()], 1500);
        let mut scopes = ScopeSet::new();
        let id = scopes.add(&manager, None, Protocol::Dns, Family::Any).unwrap();
        let scope = scopes.get_mut(id).unwrap();
        let transaction = scope.add_transaction(Question::from(key())).unwrap();
        scope.transaction_mut(transaction).unwrap().start();

        let mut packet = response(scope.transaction(transaction).unwrap().id(), "192.0.2.1");
        packet.info_mut().sender = Some("198.51.100.9:53".parse().unwrap());
        complete_transaction(&manager, scope, packet);
        assert_eq!(scope.transaction(transaction).unwrap().state(), TransactionState::Pending);
        assert!(scope.cache().is_empty());
    }
}
