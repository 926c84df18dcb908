//! Shared oracle stubs for integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use dialogue_engine::core::oracle::{ChatMessage, Oracle, OracleError, Role};

/// Replies based on the first rule whose needle appears in the latest
/// user message; records every conversation it receives.
pub struct RuleOracle {
    rules: Vec<(String, String)>,
    fallback: String,
    calls: RefCell<Vec<Vec<ChatMessage>>>,
}

impl RuleOracle {
    pub fn new(fallback: &str) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.to_string(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn rule(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), reply.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.borrow().clone()
    }
}

impl Oracle for RuleOracle {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        self.calls.borrow_mut().push(messages.to_vec());
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        for (needle, reply) in &self.rules {
            if last_user.contains(needle) {
                return Ok(reply.clone());
            }
        }
        Ok(self.fallback.clone())
    }
}

/// Replies with a fixed sequence, erroring when the sequence runs dry.
pub struct QueueOracle {
    replies: RefCell<VecDeque<String>>,
}

impl QueueOracle {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: RefCell::new(replies.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl Oracle for QueueOracle {
    fn complete(&self, _messages: &[ChatMessage]) -> Result<String, OracleError> {
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| OracleError::Request("oracle queue exhausted".to_string()))
    }
}
