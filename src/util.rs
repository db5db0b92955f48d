// Copyright 2021 Matthew Ingwersen.
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

//! Crate-private utilities.

use std::net::IpAddr;

/// Converts a nibble into a lower-case ASCII hex digit. The passed
/// value must be less than 16.
pub fn nibble_to_ascii_hex_digit(nibble: u8) -> u8 {
    debug_assert!(nibble < 16);
    b"0123456789abcdef"[(nibble & 0x0f) as usize]
}

/// Returns whether `address` is link-local (169.254.0.0/16 or
/// fe80::/10).
pub fn is_link_local(address: &IpAddr) -> bool {
    match address {
        IpAddr::V4(address) => address.is_link_local(),
        IpAddr::V6(address) => address.segments()[0] & 0xffc0 == 0xfe80,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_local_detection() {
        assert!(is_link_local(&"169.254.3.4".parse().unwrap()));
        assert!(is_link_local(&"fe80::1".parse().unwrap()));
        assert!(is_link_local(&"febf::1".parse().unwrap()));
        assert!(!is_link_local(&"192.0.2.1".parse().unwrap()));
        assert!(!is_link_local(&"fec0::1".parse().unwrap()));
    }
}
