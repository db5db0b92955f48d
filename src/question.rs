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

//! Implementation of the [`Question`] type.

use std::fmt;

use crate::rr::ResourceKey;

/// The question section of a message: an ordered list of resource keys.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Question {
    keys: Vec<ResourceKey>,
}

impl Question {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` unless an equal key is already present.
    pub fn add(&mut self, key: ResourceKey) {
        if !self.contains(&key) {
            self.keys.push(key);
        }
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.keys.contains(key)
    }

    /// Returns whether every key of `other` is also in this question.
    pub fn is_superset(&self, other: &Question) -> bool {
        other.keys.iter().all(|key| self.contains(key))
    }

    pub fn keys(&self) -> &[ResourceKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl From<ResourceKey> for Question {
    fn from(key: ResourceKey) -> Self {
        Self { keys: vec![key] }
    }
}

impl FromIterator<ResourceKey> for Question {
    fn from_iter<I: IntoIterator<Item = ResourceKey>>(iter: I) -> Self {
        let mut question = Self::new();
        for key in iter {
            question.add(key);
        }
        question
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}
