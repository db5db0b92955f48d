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

//! The [`Type`] and [`Class`] code points.
//!
//! Both are 16-bit integers on the wire. The wrappers here provide
//! constants for the values this crate deals with, and textual forms
//! following RFC 3597 § 5 (`TYPE65280`, `CLASS65280`) for the rest.

use std::fmt;
use std::str::FromStr;

/// Defines a `u16` newtype with named constants, conversions, and
/// RFC 3597-style [`Display`](fmt::Display) and [`FromStr`]
/// implementations. `$generic` is the prefix used for values without a
/// mnemonic.
macro_rules! code_point {
    (
        $(#[$attr:meta])*
        $name:ident, $generic:literal, $what:literal {
            $($constant:ident = $value:literal,)*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
        pub struct $name(u16);

        impl $name {
            $(pub const $constant: Self = Self($value);)*
        }

        impl From<u16> for $name {
            fn from(raw: u16) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u16 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = &'static str;

            fn from_str(text: &str) -> Result<Self, Self::Err> {
                $(
                    if text.eq_ignore_ascii_case(stringify!($constant)) {
                        return Ok(Self::$constant);
                    }
                )*
                match text.get(..$generic.len()) {
                    Some(prefix) if prefix.eq_ignore_ascii_case($generic) => text
                        [$generic.len()..]
                        .parse::<u16>()
                        .map(Self)
                        .or(Err(concat!($what, " value is not a valid unsigned 16-bit integer"))),
                    _ => Err(concat!("unknown ", $what)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match *self {
                    $(Self::$constant => f.write_str(stringify!($constant)),)*
                    Self(value) => write!(f, concat!($generic, "{}"), value),
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }
    };
}

code_point! {
    /// The RR type of a resource record or question.
    Type, "TYPE", "type" {
        A = 1,
        NS = 2,
        CNAME = 5,
        SOA = 6,
        PTR = 12,
        MX = 15,
        TXT = 16,
        AAAA = 28,
        SRV = 33,
        OPT = 41,
        ANY = 255,
    }
}

code_point! {
    /// The class of a resource record or question. Only [`Class::IN`]
    /// is in common use.
    Class, "CLASS", "class" {
        IN = 1,
        ANY = 255,
    }
}
