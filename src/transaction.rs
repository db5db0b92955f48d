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

//! Outstanding lookups ([`Transaction`]s) on a scope.

use std::fmt;

use log::debug;

use crate::packet::Packet;
use crate::question::Question;
use crate::scope::ScopeId;

/// Identifies a transaction within the scope that owns it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TransactionId(pub(crate) usize);

/// The state of a transaction.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransactionState {
    Null,
    Pending,
    Success,
    Failure,
    NoServers,
    Timeout,
    AttemptsMaxReached,
    Invalid,
    Resources,
    Aborted,
}

impl TransactionState {
    /// Returns whether the transaction has finished.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Null | Self::Pending)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "null",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::NoServers => "no-servers",
            Self::Timeout => "timeout",
            Self::AttemptsMaxReached => "attempts-max-reached",
            Self::Invalid => "invalid",
            Self::Resources => "resources",
            Self::Aborted => "aborted",
        })
    }
}

/// A lookup of a [`Question`] on a scope.
#[derive(Clone, Debug)]
pub struct Transaction {
    scope: Option<ScopeId>,
    id: u16,
    question: Question,
    state: TransactionState,
    received: Option<Packet>,
}

impl Transaction {
    pub(crate) fn new(scope: ScopeId, id: u16, question: Question) -> Self {
        Self {
            scope: Some(scope),
            id,
            question,
            state: TransactionState::Null,
            received: None,
        }
    }

    /// The scope this transaction runs on, or `None` once the scope has
    /// let go of it.
    pub fn scope(&self) -> Option<ScopeId> {
        self.scope
    }

    /// The message ID used on the wire.
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The response that completed the transaction, if any.
    pub fn received(&self) -> Option<&Packet> {
        self.received.as_ref()
    }

    /// Marks the transaction as sent and awaiting a response.
    pub fn start(&mut self) {
        self.state = TransactionState::Pending;
    }

    /// Records `packet` as the response and completes the transaction
    /// successfully.
    pub fn receive(&mut self, packet: Packet) {
        self.received = Some(packet);
        self.complete(TransactionState::Success);
    }

    /// Moves the transaction into the terminal state `state`.
    pub fn complete(&mut self, state: TransactionState) {
        debug_assert!(state.is_terminal());
        debug!(
            "Transaction {} for <{}> now complete with <{}>.",
            self.id, self.question, state
        );
        self.state = state;
    }

    pub(crate) fn detach(&mut self) {
        self.scope = None;
    }
}
