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

//! Helpers for domain names in their textual form.
//!
//! Names move through the resolver as escaped strings, the way users
//! and configuration files spell them (`printer.local`,
//! `hallo\.foobar.example.`). The rules follow the conventional
//! presentation format:
//!
//! * labels are separated by `.`; a single trailing `.` is allowed and
//!   means nothing, and both `""` and `"."` are the root;
//! * `\.` and `\\` escape a literal dot and backslash, and `\DDD`
//!   gives an octet in decimal;
//! * control characters (below 0x20, and DEL) are rejected, whether
//!   literal or escaped.
//!
//! All comparisons are ASCII-case-insensitive. Functions that inspect a
//! name return an [`Error`] if the name is not well formed; callers that
//! only need a yes/no answer generally treat that as "no".

use std::net::IpAddr;

use arrayvec::ArrayVec;

use crate::util::nibble_to_ascii_hex_digit;

mod error;
mod wire;
pub use error::Error;
pub use wire::{read_compressed, write_uncompressed};

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
pub const MAX_LABEL_LEN: usize = 63;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
pub const MAX_WIRE_LEN: usize = 255;

/// An unescaped label.
pub type LabelBuf = ArrayVec<u8, MAX_LABEL_LEN>;

////////////////////////////////////////////////////////////////////////
// LABEL ITERATION                                                    //
////////////////////////////////////////////////////////////////////////

/// An iterator over the unescaped labels of a textual name, from left
/// to right. The terminal root label is not produced.
///
/// After yielding an error, the iterator is exhausted.
pub struct Labels<'a> {
    rest: &'a str,
    failed: bool,
}

/// Returns an iterator over the labels of `name`.
pub fn labels(name: &str) -> Labels<'_> {
    let rest = if name == "." { "" } else { name };
    Labels {
        rest,
        failed: false,
    }
}

impl Iterator for Labels<'_> {
    type Item = Result<LabelBuf, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        match unescape_label(self.rest) {
            Ok((label, rest)) => {
                self.rest = rest;
                Some(Ok(label))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Unescapes the first label of the non-empty string `text`, returning
/// it along with the remainder of the string after the separating dot.
fn unescape_label(text: &str) -> Result<(LabelBuf, &str), Error> {
    let octets = text.as_bytes();
    let mut label = LabelBuf::new();
    let mut i = 0;

    while i < octets.len() && octets[i] != b'.' {
        let octet = if octets[i] == b'\\' {
            match octets.get(i + 1) {
                Some(&c @ (b'.' | b'\\')) => {
                    i += 2;
                    c
                }
                Some(c) if c.is_ascii_digit() => {
                    let digits = octets.get(i + 1..i + 4).ok_or(Error::InvalidEscape)?;
                    if !digits.iter().all(u8::is_ascii_digit) {
                        return Err(Error::InvalidEscape);
                    }
                    let value = digits
                        .iter()
                        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
                    if value < 0x20 || value == 0x7f || value > 0xff {
                        return Err(Error::InvalidCharacter);
                    }
                    i += 4;
                    value as u8
                }
                _ => return Err(Error::InvalidEscape),
            }
        } else if octets[i] >= b' ' && octets[i] != 0x7f {
            i += 1;
            octets[i - 1]
        } else {
            return Err(Error::InvalidCharacter);
        };
        label.try_push(octet).or(Err(Error::LabelTooLong))?;
    }

    if label.is_empty() {
        return Err(Error::EmptyLabel);
    }
    let rest = if i < octets.len() { &text[i + 1..] } else { "" };
    Ok((label, rest))
}

/// Parses all labels of `name`.
pub fn parse(name: &str) -> Result<Vec<LabelBuf>, Error> {
    labels(name).collect()
}

////////////////////////////////////////////////////////////////////////
// ESCAPING AND NORMALIZATION                                         //
////////////////////////////////////////////////////////////////////////

/// Escapes a single label for presentation. Letters, digits, `-`, and
/// `_` are kept; `.` and `\` are backslash-escaped; everything else is
/// written as `\DDD`.
pub fn escape_label(label: &[u8]) -> String {
    let mut escaped = String::with_capacity(label.len());
    for &octet in label {
        if octet == b'.' || octet == b'\\' {
            escaped.push('\\');
            escaped.push(octet as char);
        } else if octet.is_ascii_alphanumeric() || octet == b'-' || octet == b'_' {
            escaped.push(octet as char);
        } else {
            escaped.push_str(&format!("\\{octet:03}"));
        }
    }
    escaped
}

/// Returns the canonical escaped form of `name`, without a trailing
/// dot. The root is normalized to the empty string.
pub fn normalize(name: &str) -> Result<String, Error> {
    let mut normalized = String::new();
    for label in labels(name) {
        let label = label?;
        if !normalized.is_empty() {
            normalized.push('.');
        }
        normalized.push_str(&escape_label(&label));
    }
    Ok(normalized)
}

////////////////////////////////////////////////////////////////////////
// PREDICATES                                                         //
////////////////////////////////////////////////////////////////////////

/// Returns whether two names are equal.
pub fn equal(a: &str, b: &str) -> Result<bool, Error> {
    let mut a = labels(a);
    let mut b = labels(b);
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ok(true),
            (Some(x), Some(y)) => {
                let (x, y) = (x?, y?);
                if !x.eq_ignore_ascii_case(&y) {
                    return Ok(false);
                }
            }
            (Some(x), None) | (None, Some(x)) => {
                x?;
                return Ok(false);
            }
        }
    }
}

/// Returns whether `name` is equal to or a subdomain of `suffix`.
pub fn ends_with(name: &str, suffix: &str) -> Result<bool, Error> {
    let name = parse(name)?;
    let suffix = parse(suffix)?;
    Ok(name.len() >= suffix.len()
        && name
            .iter()
            .rev()
            .zip(suffix.iter().rev())
            .all(|(a, b)| a.eq_ignore_ascii_case(b)))
}

/// Returns whether `name` is the root.
pub fn is_root(name: &str) -> Result<bool, Error> {
    Ok(labels(name).next().transpose()?.is_none())
}

/// Returns whether `name` has exactly one label.
pub fn is_single_label(name: &str) -> Result<bool, Error> {
    let mut labels = labels(name);
    match labels.next().transpose()? {
        None => Ok(false),
        Some(_) => Ok(labels.next().transpose()?.is_none()),
    }
}

/// Returns whether `name` refers to the local host by convention
/// (`localhost`, `localdomain`, or anything below them). Malformed
/// names are not localhost.
pub fn is_localhost(name: &str) -> bool {
    ["localhost", "localdomain"]
        .iter()
        .any(|suffix| ends_with(name, suffix).unwrap_or(false))
}

////////////////////////////////////////////////////////////////////////
// REVERSE-MAPPING NAMES                                              //
////////////////////////////////////////////////////////////////////////

/// Returns the `in-addr.arpa` or `ip6.arpa` name used to map `address`
/// back to a host name.
pub fn reverse(address: IpAddr) -> String {
    match address {
        IpAddr::V4(address) => {
            let [a, b, c, d] = address.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(address) => {
            let mut name = String::with_capacity(72);
            for octet in address.octets().iter().rev() {
                name.push(nibble_to_ascii_hex_digit(octet & 0x0f) as char);
                name.push('.');
                name.push(nibble_to_ascii_hex_digit(octet >> 4) as char);
                name.push('.');
            }
            name.push_str("ip6.arpa");
            name
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
