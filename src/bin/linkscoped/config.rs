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

//! Implements the daemon configuration file.

use std::fmt::{self, Display, Write};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::Level::Debug;
use log::{debug, log_enabled};
use paste::paste;
use serde::{de, Deserialize};

use linkscope::name;

use crate::args::SetupArgs;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the configuration from the file given by `path`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let raw_config = fs::read(path.as_ref()).context("failed to read the configuration file")?;
    let config: Config =
        toml::from_slice(&raw_config).context("failed to parse the configuration file")?;
    log_config_summary(&config);
    Ok(config)
}

/// Loads the configuration from the parsed command line arguments given
/// by `args`.
pub fn load_from_args(args: SetupArgs) -> Result<Config> {
    let hostname = args
        .hostname
        .map(|hostname| ConfigName::new(&hostname))
        .transpose()
        .context("invalid host name")?;
    let domains = args
        .domains
        .iter()
        .map(|domain| ConfigName::new(domain))
        .collect::<Result<_>>()
        .context("invalid domain")?;

    let config = Config {
        hostname,
        dns_servers: args.dns,
        domains,
        mtu: default_mtu(),
        links: args
            .llmnr_links
            .into_iter()
            .map(|ld| LinkConfig {
                name: ld.name,
                ifindex: ld.ifindex,
                mtu: default_mtu(),
                llmnr: true,
                dns_servers: Vec::new(),
                domains: Vec::new(),
                addresses: Vec::new(),
            })
            .collect(),
    };
    log_config_summary(&config);
    Ok(config)
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    let hostname = config
        .hostname
        .as_ref()
        .map_or("(system host name)", |name| name.0.as_str());
    let mut message = format!(
        "Configuration loaded:\n\
         Host name:   {}\n\
         DNS servers: {}\n\
         Domains:     {}\n\
         MTU:         {}\n\
         Links:       ",
        hostname,
        list(&config.dns_servers),
        list(&config.domains),
        config.mtu,
    );
    if config.links.is_empty() {
        message.push_str("none");
    } else {
        write!(message, "{}", config.links.len()).unwrap();
        for link in &config.links {
            write!(
                message,
                "\n  {} (index {}, MTU {}): LLMNR {}, DNS servers {}, domains {}, addresses {}",
                link.name,
                link.ifindex
                    .map_or_else(|| "by name".to_owned(), |i| i.to_string()),
                link.mtu,
                if link.llmnr { "on" } else { "off" },
                list(&link.dns_servers),
                list(&link.domains),
                list(&link.addresses),
            )
            .unwrap();
        }
    }
    debug!("{}", message);
}

fn list<T: Display>(items: &[T]) -> String {
    if items.is_empty() {
        String::from("none")
    } else {
        items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub hostname: Option<ConfigName>,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
    #[serde(default)]
    pub domains: Vec<ConfigName>,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

/// The configuration of a single link.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    pub name: String,
    pub ifindex: Option<u32>,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default = "default_llmnr")]
    pub llmnr: bool,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
    #[serde(default)]
    pub domains: Vec<ConfigName>,
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
}

fn default_mtu() -> u32 {
    1500
}

fn default_llmnr() -> bool {
    true
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS FOR SERDE                                                 //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type,
/// produced from a string by `$parse`.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $parse:path, $description:literal) => {
        /// A macro-generated deserializable wrapper.
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub struct $wrapper(pub $over);

        impl $wrapper {
            pub fn new(value: &str) -> Result<Self> {
                $parse(value)
                    .map($wrapper)
                    .map_err(|e| anyhow!("invalid {}: {}", $description, e))
            }
        }

        impl Display for $wrapper {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                $parse(value)
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigName, String, name::normalize, "domain name");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_configuration_parses() {
        let config: Config = toml::from_str(
            r#"
            hostname = "MyHost"
            dns_servers = ["192.0.2.53"]
            mtu = 1400

            [[links]]
            name = "eth0"
            ifindex = 2
            domains = ["corp.example."]
            addresses = ["169.254.10.1", "fe80::1"]
            "#,
        )
        .unwrap();
        assert_eq!(config.hostname, Some(ConfigName("MyHost".into())));
        assert_eq!(config.mtu, 1400);
        let link = &config.links[0];
        assert!(link.llmnr);
        assert_eq!(link.mtu, 1500);
        assert_eq!(link.domains, [ConfigName("corp.example".into())]);
        assert_eq!(link.addresses.len(), 2);
    }

    #[test]
    fn unknown_fields_and_bad_names_are_rejected() {
        assert!(toml::from_str::<Config>("bogus = 1").is_err());
        assert!(toml::from_str::<Config>(r#"hostname = "a..b""#).is_err());
    }
}
