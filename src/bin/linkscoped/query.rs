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

//! Implements the `query` command: a one-shot lookup through the same
//! scopes the daemon would use.

use std::net::{IpAddr, SocketAddr};
use std::process;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use env_logger::Env;
use log::{debug, warn};

use linkscope::manager::Manager;
use linkscope::packet::{Flags, Packet, PacketInfo, PacketWriter};
use linkscope::name;
use linkscope::protocol::{Family, Protocol, DNS_PORT};
use linkscope::question::Question;
use linkscope::rr::{Class, ResourceKey, Type};
use linkscope::scope::{self, Scope, ScopeId, ScopeSet};
use linkscope::stream::{PacketStream, TcpPacketStream};
use linkscope::transaction::{TransactionId, TransactionState};

use crate::args::QueryArgs;
use crate::manager::UdpManager;
use crate::run::{load_config, log_failure, run_once};
use crate::scopes;

/// Runs a one-shot query.
pub fn query(args: QueryArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_querying(args) {
        log_failure("Failed to query:", &e);
        process::exit(1);
    }
}

fn try_querying(args: QueryArgs) -> Result<()> {
    let flags = args.lookup_flags();
    let family = args.family();
    let timeout = Duration::from_millis(args.timeout);
    let config = load_config(args.setup)?;
    let (manager, mut scopes) = scopes::set_up(&config).context("failed to set up scopes")?;

    let default_ifindex = match args.link {
        Some(ref link) => resolve_interface(&scopes, link)?,
        None => 0,
    };

    let mut started = Vec::new();
    for text in &args.names {
        for lookup in plan_lookups(text, args.rr_type, args.class, family)? {
            let ifindex = match lookup.interface {
                Some(ref interface) => resolve_interface(&scopes, interface)?,
                None => default_ifindex,
            };
            let targets = scopes.route(ifindex, flags, lookup.key.name());
            if targets.is_empty() {
                warn!("No scope is suitable for {}.", lookup.key);
                continue;
            }
            debug!("Looking up {} on {} scopes.", lookup.key, targets.len());

            for id in targets {
                let Some(scope) = scopes.get_mut(id) else {
                    continue;
                };
                if !scope.good_key(&lookup.key) {
                    continue;
                }
                let transaction = scope.add_transaction(Question::from(lookup.key.clone()))?;
                start(&manager, scope, transaction, timeout)?;
                started.push((id, transaction));
            }
        }
    }
    if started.is_empty() {
        bail!("no scope is suitable for the given names");
    }

    let deadline = manager.now() + timeout;
    while manager.now() < deadline && any_pending(&scopes, &started) {
        run_once(&manager, &mut scopes)?;
    }

    for &(id, transaction) in &started {
        let Some(scope) = scopes.get_mut(id) else {
            continue;
        };
        retry_truncated_over_tcp(&manager, scope, transaction, timeout);
        if let Some(transaction) = scope.transaction_mut(transaction) {
            if transaction.state() == TransactionState::Pending {
                transaction.complete(TransactionState::Timeout);
            }
        }
    }

    print_results(&scopes, &started);
    Ok(())
}

/// A single key to look up, optionally pinned to an interface.
#[derive(Debug, PartialEq)]
struct Lookup {
    key: ResourceKey,
    interface: Option<String>,
}

/// Turns one command-line name into the keys to look up. With an
/// explicit type, `text` is the record name. Otherwise an address is
/// mapped back to names through PTR, and anything else is a host name
/// whose addresses of `family` are wanted.
fn plan_lookups(
    text: &str,
    rr_type: Option<Type>,
    class: Option<Class>,
    family: Family,
) -> Result<Vec<Lookup>> {
    if let Some(rr_type) = rr_type {
        let key = ResourceKey::new(class.unwrap_or(Class::IN), rr_type, text)
            .with_context(|| format!("invalid name {}", text))?;
        return Ok(vec![Lookup {
            key,
            interface: None,
        }]);
    }

    if let Some((address, interface)) = parse_address(text) {
        let key = ResourceKey::new(Class::IN, Type::PTR, &name::reverse(address))
            .context("invalid reverse name")?;
        return Ok(vec![Lookup {
            key,
            interface: interface.map(str::to_owned),
        }]);
    }

    let types: &[Type] = match family {
        Family::V4 => &[Type::A],
        Family::V6 => &[Type::AAAA],
        Family::Any => &[Type::A, Type::AAAA],
    };
    types
        .iter()
        .map(|&rr_type| {
            let key = ResourceKey::new(Class::IN, rr_type, text)
                .with_context(|| format!("invalid host name {}", text))?;
            Ok(Lookup {
                key,
                interface: None,
            })
        })
        .collect()
}

/// Parses `ADDRESS` or `ADDRESS%IFACE`.
fn parse_address(text: &str) -> Option<(IpAddr, Option<&str>)> {
    let (address, interface) = match text.split_once('%') {
        Some((address, interface)) => (address, Some(interface)),
        None => (text, None),
    };
    address.parse().ok().map(|address| (address, interface))
}

/// Finds the interface index named by `interface`: either a number or
/// the name of a configured link.
fn resolve_interface(scopes: &ScopeSet, interface: &str) -> Result<u32> {
    if let Ok(ifindex) = interface.parse::<u32>() {
        if ifindex > 0 {
            return Ok(ifindex);
        }
    }
    scopes
        .iter()
        .find_map(|scope| scope.link().filter(|link| link.name == interface))
        .map(|link| link.ifindex)
        .ok_or_else(|| anyhow!("link {} is not configured", interface))
}

/// Sends the query of `transaction`, falling back to TCP if it does not
/// fit in a datagram.
fn start(manager: &UdpManager, scope: &mut Scope, id: TransactionId, timeout: Duration) -> Result<()> {
    let Some(transaction) = scope.transaction(id) else {
        return Ok(());
    };
    let packet = make_query(scope.protocol(), transaction.id(), transaction.question())?;

    match scope.emit(manager, &packet) {
        Ok(()) => {
            if let Some(transaction) = scope.transaction_mut(id) {
                transaction.start();
            }
        }
        Err(scope::Error::MessageTooLarge) => {
            if let Some(transaction) = scope.transaction_mut(id) {
                transaction.start();
            }
            match query_over_tcp(manager, scope, &packet, timeout) {
                Ok(reply) => scopes::complete_transaction(manager, scope, reply),
                Err(e) => {
                    warn!("TCP query failed: {:#}.", e);
                    fail(scope, id, TransactionState::Failure);
                }
            }
        }
        Err(scope::Error::NoServer) => fail(scope, id, TransactionState::NoServers),
        Err(scope::Error::RateLimited) => fail(scope, id, TransactionState::Resources),
        Err(e) => {
            warn!("Failed to send query: {}.", e);
            fail(scope, id, TransactionState::Failure);
        }
    }
    Ok(())
}

fn fail(scope: &mut Scope, id: TransactionId, state: TransactionState) {
    if let Some(transaction) = scope.transaction_mut(id) {
        transaction.complete(state);
    }
}

fn make_query(protocol: Protocol, id: u16, question: &Question) -> Result<Packet> {
    let mut writer = PacketWriter::new(protocol);
    writer.set_id(id);
    writer.set_flags(Flags::query(protocol));
    writer.add_question(question);
    writer.finish().context("failed to build the query")
}

fn any_pending(scopes: &ScopeSet, started: &[(ScopeId, TransactionId)]) -> bool {
    started.iter().any(|&(id, transaction)| {
        scopes
            .get(id)
            .and_then(|scope| scope.transaction(transaction))
            .map_or(false, |t| t.state() == TransactionState::Pending)
    })
}

/// Repeats a classic DNS query over TCP if its response came back
/// truncated.
fn retry_truncated_over_tcp(manager: &UdpManager, scope: &mut Scope, id: TransactionId, timeout: Duration) {
    if scope.protocol() != Protocol::Dns {
        return;
    }
    let Some(transaction) = scope.transaction(id) else {
        return;
    };
    if !transaction.received().map_or(false, Packet::tc) {
        return;
    }
    debug!("Response to transaction {} was truncated; retrying over TCP.", transaction.id());
    let packet = match make_query(scope.protocol(), transaction.id(), transaction.question()) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("{:#}.", e);
            return;
        }
    };
    match query_over_tcp(manager, scope, &packet, timeout) {
        Ok(reply) => {
            if let Some(transaction) = scope.transaction_mut(id) {
                transaction.start();
            }
            scopes::complete_transaction(manager, scope, reply);
        }
        Err(e) => warn!("TCP query failed: {:#}.", e),
    }
}

/// Sends `packet` to the scope's DNS server over TCP and waits for the
/// response with the same ID.
fn query_over_tcp(manager: &UdpManager, scope: &Scope, packet: &Packet, timeout: Duration) -> Result<Packet> {
    let server = scope
        .dns_server(manager)
        .ok_or_else(|| anyhow!("no DNS server is configured"))?;
    let stream = scope
        .tcp_socket(manager, Some(server.address), DNS_PORT)
        .context("failed to connect")?;
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let info = PacketInfo {
        sender: Some(SocketAddr::new(server.address, DNS_PORT)),
        ..PacketInfo::default()
    };
    let mut stream = TcpPacketStream::new(stream, scope.protocol(), info);
    stream.write_packet(packet).context("failed to send the query")?;
    loop {
        match stream.read_packet().context("failed to read the response")? {
            Some(reply) if reply.id() == packet.id() => return Ok(reply),
            Some(_) => continue,
            None if stream.is_eof() => bail!("the server closed the connection"),
            None => bail!("timed out"),
        }
    }
}

fn print_results(scopes: &ScopeSet, started: &[(ScopeId, TransactionId)]) {
    for &(id, transaction) in started {
        let Some(scope) = scopes.get(id) else {
            continue;
        };
        let Some(transaction) = scope.transaction(transaction) else {
            continue;
        };
        let link = scope.link().map_or("*", |link| link.name.as_str());
        println!(
            ";; {} on {} ({}): {}",
            scope.protocol(),
            link,
            scope.family(),
            transaction.state()
        );
        if let Some(reply) = transaction.received() {
            println!(";; rcode {}", reply.rcode());
            match reply.extract() {
                Ok(sections) => {
                    for rr in &sections.answer {
                        println!("{}", rr);
                    }
                }
                Err(e) => println!(";; malformed response: {}", e),
            }
        }
    }
}
