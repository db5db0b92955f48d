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

//! The per-scope [`Cache`] of records learned from other hosts.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::answer::Answer;
use crate::rr::{ResourceKey, ResourceRecord};

#[derive(Clone, Debug)]
struct CacheItem {
    rr: ResourceRecord,
    owner: Option<IpAddr>,
    expires: Instant,
}

/// Records learned from responses, keyed by resource key, each
/// remembering the address of the host it came from.
#[derive(Clone, Debug, Default)]
pub struct Cache {
    by_key: HashMap<ResourceKey, Vec<CacheItem>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches `rr`, learned from `owner` at time `now`. A record with a
    /// TTL of zero removes what we have for its key.
    pub fn put(&mut self, rr: ResourceRecord, owner: Option<IpAddr>, now: Instant) {
        if rr.ttl == 0 {
            self.by_key.remove(&rr.key);
            return;
        }
        let expires = now + Duration::from_secs(rr.ttl.into());
        let items = self.by_key.entry(rr.key.clone()).or_default();
        items.retain(|item| !item.rr.same_data(&rr));
        items.push(CacheItem { rr, owner, expires });
    }

    /// Caches every record of `answer`.
    pub fn put_answer(&mut self, answer: &Answer, owner: Option<IpAddr>, now: Instant) {
        for rr in answer {
            self.put(rr.clone(), owner, now);
        }
    }

    /// Returns the unexpired records for `key`, pruning expired ones.
    pub fn lookup(&mut self, key: &ResourceKey, now: Instant) -> Answer {
        let Some(items) = self.by_key.get_mut(key) else {
            return Answer::new();
        };
        items.retain(|item| item.expires > now);
        let answer = items.iter().map(|item| item.rr.clone()).collect();
        if items.is_empty() {
            self.by_key.remove(key);
        }
        answer
    }

    /// Returns whether `rr`, received from `owner`, conflicts with what
    /// we have cached: we hold unexpired records for its key, none of
    /// them carries the same data, and at least one was learned from a
    /// different host.
    pub fn check_conflicts(&self, rr: &ResourceRecord, owner: Option<IpAddr>, now: Instant) -> bool {
        let Some(items) = self.by_key.get(&rr.key) else {
            return false;
        };
        let mut same_owner = true;
        for item in items.iter().filter(|item| item.expires > now) {
            if item.rr.same_data(rr) {
                return false;
            }
            if item.owner != owner {
                same_owner = false;
            }
        }
        !same_owner
    }

    pub fn flush(&mut self) {
        self.by_key.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(address: &str, ttl: u32) -> ResourceRecord {
        ResourceRecord::address("peer", address.parse().unwrap(), ttl).unwrap()
    }

    fn host(address: &str) -> Option<IpAddr> {
        Some(address.parse().unwrap())
    }

    #[test]
    fn records_expire() {
        let now = Instant::now();
        let mut cache = Cache::new();
        cache.put(a("192.0.2.1", 10), host("192.0.2.1"), now);
        assert_eq!(cache.lookup(&a("192.0.2.1", 10).key, now).len(), 1);
        let later = now + Duration::from_secs(11);
        assert!(cache.lookup(&a("192.0.2.1", 10).key, later).is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_flushes_key() {
        let now = Instant::now();
        let mut cache = Cache::new();
        cache.put(a("192.0.2.1", 10), None, now);
        cache.put(a("192.0.2.2", 0), None, now);
        assert!(cache.is_empty());
    }

    #[test]
    fn different_data_from_a_different_host_conflicts() {
        let now = Instant::now();
        let mut cache = Cache::new();
        cache.put(a("192.0.2.1", 30), host("192.0.2.1"), now);

        assert!(!cache.check_conflicts(&a("192.0.2.1", 30), host("192.0.2.7"), now));
        assert!(!cache.check_conflicts(&a("192.0.2.2", 30), host("192.0.2.1"), now));
        assert!(cache.check_conflicts(&a("192.0.2.2", 30), host("192.0.2.7"), now));

        let other = ResourceRecord::address("other", "192.0.2.2".parse().unwrap(), 30).unwrap();
        assert!(!cache.check_conflicts(&other, host("192.0.2.7"), now));
    }
}
