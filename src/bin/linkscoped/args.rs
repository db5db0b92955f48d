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

//! Implements command-line argument parsing.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use clap::{ArgGroup, Parser, Subcommand};

use linkscope::protocol::Family;
use linkscope::rr::{Class, Type};
use linkscope::scope::LookupFlags;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The linkscope per-link DNS and LLMNR resolver
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the resolver daemon
    Run(RunArgs),

    /// Look up a name once and print the answers
    Query(QueryArgs),
}

/// Arguments describing the links and servers to set up, shared by all
/// commands.
#[derive(Debug, clap::Args)]
pub struct SetupArgs {
    /// Set the configuration file to use
    #[clap(
        long,
        conflicts_with_all = &["hostname", "dns", "domains", "llmnr_links"],
        value_name = "FILE"
    )]
    pub config: Option<PathBuf>,

    /// Set the host name published on LLMNR links
    #[clap(long, value_name = "NAME")]
    pub hostname: Option<String>,

    /// Add global DNS servers
    #[clap(long, value_delimiter = ',', value_name = "IP")]
    pub dns: Vec<IpAddr>,

    /// Add domains routed to the global DNS servers
    #[clap(long = "domain", value_delimiter = ',', value_name = "DOMAIN")]
    pub domains: Vec<String>,

    /// Enable LLMNR on links
    #[clap(long = "llmnr-link", value_delimiter = ',', value_name = "IFNAME[:IFINDEX]")]
    pub llmnr_links: Vec<LinkDescription>,
}

#[derive(Debug, Parser)]
#[clap(group(ArgGroup::new("required").required(true).multiple(true).args(&["config", "dns", "llmnr_links"])))]
pub struct RunArgs {
    #[clap(flatten)]
    pub setup: SetupArgs,
}

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The host names, addresses (optionally ADDRESS%IFACE) or, with
    /// --type, record names to look up
    #[clap(required = true, value_name = "NAME")]
    pub names: Vec<String>,

    /// Only look up IPv4 addresses
    #[clap(short = '4', conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Only look up IPv6 addresses
    #[clap(short = '6')]
    pub ipv6: bool,

    /// Look up via these protocols only (dns, llmnr, llmnr-ipv4,
    /// llmnr-ipv6)
    #[clap(short = 'p', long = "protocol", value_delimiter = ',', value_name = "PROTOCOL")]
    pub protocols: Vec<ProtocolSelection>,

    /// Ask for records of this type instead of resolving host names or
    /// addresses
    #[clap(short = 't', long = "type", value_name = "TYPE")]
    pub rr_type: Option<Type>,

    /// The class to ask for together with --type (default IN)
    #[clap(short = 'c', long, requires = "rr_type", value_name = "CLASS")]
    pub class: Option<Class>,

    /// Only ask on this link
    #[clap(short = 'i', long, value_name = "IFNAME")]
    pub link: Option<String>,

    /// Give up after this many milliseconds
    #[clap(long, default_value_t = 3000, value_name = "MS")]
    pub timeout: u64,

    #[clap(flatten)]
    pub setup: SetupArgs,
}

impl QueryArgs {
    /// The protocols selected with --protocol; all of them if none was
    /// given.
    pub fn lookup_flags(&self) -> LookupFlags {
        if self.protocols.is_empty() {
            return LookupFlags::ALL;
        }
        self.protocols
            .iter()
            .fold(LookupFlags::empty(), |flags, selection| flags | selection.0)
    }

    /// The address family selected with -4 or -6.
    pub fn family(&self) -> Family {
        if self.ipv4 {
            Family::V4
        } else if self.ipv6 {
            Family::V6
        } else {
            Family::Any
        }
    }
}

/// A protocol given with `--protocol`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProtocolSelection(pub LookupFlags);

impl FromStr for ProtocolSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let flags = match s {
            "dns" => LookupFlags::DNS,
            "llmnr" => LookupFlags::LLMNR,
            "llmnr-ipv4" => LookupFlags::LLMNR_IPV4,
            "llmnr-ipv6" => LookupFlags::LLMNR_IPV6,
            _ => return Err(anyhow!("unknown protocol specifier: {}", s)),
        };
        Ok(Self(flags))
    }
}

/// A link given on the command line with `--llmnr-link`, in one of two
/// forms:
///
/// * `eth0:2`, giving the interface index explicitly;
/// * `eth0`, looking the index up by name when the link is set up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkDescription {
    pub name: String,
    pub ifindex: Option<u32>,
}

impl FromStr for LinkDescription {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, ifindex) = match s.split_once(':') {
            Some((name, ifindex)) => (
                name,
                Some(
                    ifindex
                        .parse()
                        .map_err(|e| anyhow!("invalid interface index: {}", e))?,
                ),
            ),
            None => (s, None),
        };
        if name.is_empty() {
            Err(anyhow!("the interface name is empty"))
        } else {
            Ok(Self {
                name: name.to_owned(),
                ifindex,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_query(args: &[&str]) -> clap::error::Result<QueryArgs> {
        let args = Args::try_parse_from(["linkscoped", "query"].iter().chain(args))?;
        match args.command {
            Command::Query(query) => Ok(query),
            Command::Run(_) => panic!("parsed the wrong subcommand"),
        }
    }

    #[test]
    fn query_defaults_to_every_protocol_and_family() {
        let query = parse_query(&["host", "192.0.2.7"]).unwrap();
        assert_eq!(query.names, ["host", "192.0.2.7"]);
        assert_eq!(query.lookup_flags(), LookupFlags::ALL);
        assert_eq!(query.family(), Family::Any);
        assert_eq!(query.rr_type, None);
        assert_eq!(query.class, None);
        assert_eq!(query.timeout, 3000);
    }

    #[test]
    fn query_protocols_accumulate() {
        let query = parse_query(&["-p", "dns", "--protocol", "llmnr-ipv6", "host"]).unwrap();
        assert_eq!(query.lookup_flags(), LookupFlags::DNS | LookupFlags::LLMNR_IPV6);

        let query = parse_query(&["-p", "llmnr-ipv4,llmnr-ipv6", "host"]).unwrap();
        assert_eq!(query.lookup_flags(), LookupFlags::LLMNR);

        assert!(parse_query(&["-p", "mdns", "host"]).is_err());
    }

    #[test]
    fn query_family_flags_are_exclusive() {
        assert_eq!(parse_query(&["-4", "host"]).unwrap().family(), Family::V4);
        assert_eq!(parse_query(&["-6", "host"]).unwrap().family(), Family::V6);
        assert!(parse_query(&["-4", "-6", "host"]).is_err());
    }

    #[test]
    fn query_class_requires_type() {
        assert!(parse_query(&["-c", "IN", "host"]).is_err());

        let query = parse_query(&["-t", "mx", "-c", "CLASS1", "example.com"]).unwrap();
        assert_eq!(query.rr_type, Some(Type::MX));
        assert_eq!(query.class, Some(Class::IN));

        assert!(parse_query(&["--type", "BOGUS", "example.com"]).is_err());
    }

    #[test]
    fn query_needs_a_name() {
        assert!(parse_query(&["--link", "eth0"]).is_err());
    }

    #[test]
    fn link_description_from_str_accepts_both_forms() {
        let explicit: LinkDescription = "eth0:2".parse().unwrap();
        assert_eq!(explicit.name, "eth0");
        assert_eq!(explicit.ifindex, Some(2));

        let by_name: LinkDescription = "wlan0".parse().unwrap();
        assert_eq!(by_name.ifindex, None);

        assert!("eth0:x".parse::<LinkDescription>().is_err());
        assert!(":2".parse::<LinkDescription>().is_err());
    }
}
