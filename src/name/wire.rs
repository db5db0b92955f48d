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

//! Conversion between textual names and their on-the-wire form.

use super::{escape_label, labels, Error, MAX_LABEL_LEN, MAX_WIRE_LEN};

////////////////////////////////////////////////////////////////////////
// WRITING                                                            //
////////////////////////////////////////////////////////////////////////

/// Appends the uncompressed on-the-wire form of the textual name `name`
/// to `out`. On failure, `out` is left as it was.
pub fn write_uncompressed(name: &str, out: &mut Vec<u8>) -> Result<(), Error> {
    let start = out.len();
    for label in labels(name) {
        let label = match label {
            Ok(label) => label,
            Err(e) => {
                out.truncate(start);
                return Err(e);
            }
        };
        out.push(label.len() as u8);
        out.extend_from_slice(&label);
        if out.len() - start + 1 > MAX_WIRE_LEN {
            out.truncate(start);
            return Err(Error::NameTooLong);
        }
    }
    out.push(0);
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// READING                                                            //
////////////////////////////////////////////////////////////////////////

/// Reads a compressed name starting at index `start` of `octets`,
/// following pointers. Indices in pointers are indices of `octets`, so
/// the entire DNS message should be passed. Returns the name in
/// normalized textual form along with the number of octets the name
/// occupies at `start`.
pub fn read_compressed(octets: &[u8], start: usize) -> Result<(String, usize), Error> {
    let mut text = String::new();
    let mut wire_len = 0;
    let mut chunk_start = start;
    let mut index = start;
    let mut len_at_start = None;

    loop {
        let len = *octets.get(index).ok_or(Error::UnexpectedEom)?;
        if len & 0xc0 == 0xc0 {
            let pointer = parse_pointer(octets, chunk_start, index)?;
            len_at_start.get_or_insert(index + 2 - start);
            chunk_start = pointer;
            index = pointer;
        } else if len as usize > MAX_LABEL_LEN {
            return Err(Error::LabelTooLong);
        } else if len == 0 {
            let len_at_start = *len_at_start.get_or_insert(index + 1 - start);
            return Ok((text, len_at_start));
        } else {
            let end = index + 1 + len as usize;
            let label = octets.get(index + 1..end).ok_or(Error::UnexpectedEom)?;
            if label.iter().any(|&c| c < b' ' || c == 0x7f) {
                return Err(Error::InvalidCharacter);
            }
            wire_len += label.len() + 1;
            if wire_len + 1 > MAX_WIRE_LEN {
                return Err(Error::NameTooLong);
            }
            if !text.is_empty() {
                text.push('.');
            }
            text.push_str(&escape_label(label));
            index = end;
        }
    }
}

/// Parses a pointer at `index` in `octets`, checking that it refers to
/// an index before `chunk_start` (RFC 1035 § 4.1.4 only allows pointers
/// to *prior* occurrences, which also rules out loops).
fn parse_pointer(octets: &[u8], chunk_start: usize, index: usize) -> Result<usize, Error> {
    let bytes = octets.get(index..index + 2).ok_or(Error::UnexpectedEom)?;
    let pointer = (u16::from_be_bytes([bytes[0], bytes[1]]) & !0xc000) as usize;
    if pointer >= chunk_start {
        Err(Error::InvalidPointer)
    } else {
        Ok(pointer)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
