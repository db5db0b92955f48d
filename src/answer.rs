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

//! Implementation of the [`Answer`] type.

use crate::rr::ResourceRecord;
use crate::util::is_link_local;

/// An ordered collection of resource records.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Answer {
    records: Vec<ResourceRecord>,
}

impl Answer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `rr` unless a record with the same key and RDATA is already
    /// present.
    pub fn add(&mut self, rr: ResourceRecord) {
        if !self.records.iter().any(|existing| existing.same_data(&rr)) {
            self.records.push(rr);
        }
    }

    /// Moves records carrying link-local addresses to the front (if
    /// `prefer_link_local`) or to the back. The relative order within
    /// each group is preserved.
    pub fn order_by_scope(&mut self, prefer_link_local: bool) {
        self.records.sort_by_key(|rr| {
            rr.ip_address()
                .map_or(false, |address| is_link_local(&address))
                != prefer_link_local
        });
    }

    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a Answer {
    type Item = &'a ResourceRecord;
    type IntoIter = std::slice::Iter<'a, ResourceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl FromIterator<ResourceRecord> for Answer {
    fn from_iter<I: IntoIterator<Item = ResourceRecord>>(iter: I) -> Self {
        let mut answer = Self::new();
        for rr in iter {
            answer.add(rr);
        }
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_rr(address: &str) -> ResourceRecord {
        ResourceRecord::address("host", address.parse().unwrap(), 30).unwrap()
    }

    fn addresses(answer: &Answer) -> Vec<String> {
        answer
            .iter()
            .map(|rr| rr.ip_address().unwrap().to_string())
            .collect()
    }

    #[test]
    fn order_by_scope_is_a_stable_partition() {
        let mut answer: Answer = ["192.0.2.1", "169.254.1.1", "192.0.2.2", "fe80::1"]
            .into_iter()
            .map(address_rr)
            .collect();

        answer.order_by_scope(true);
        assert_eq!(
            addresses(&answer),
            ["169.254.1.1", "fe80::1", "192.0.2.1", "192.0.2.2"]
        );

        answer.order_by_scope(false);
        assert_eq!(
            addresses(&answer),
            ["192.0.2.1", "192.0.2.2", "169.254.1.1", "fe80::1"]
        );
    }

    #[test]
    fn add_ignores_duplicates() {
        let mut answer = Answer::new();
        answer.add(address_rr("192.0.2.1"));
        answer.add(address_rr("192.0.2.1"));
        assert_eq!(answer.len(), 1);
    }
}
