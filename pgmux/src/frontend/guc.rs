//! Session configuration replay.
//!
//! Clients don't keep their backend between transactions, so anything
//! they change with `SET` would leak into other sessions or get lost.
//! Every `SET`/`RESET` is turned into a `set local` fragment and
//! accumulated per client. The accumulated script is then sent along with
//! each later statement, so it runs in the same transaction as the
//! statement on whichever backend happens to serve it.

use std::collections::VecDeque;
use std::ops::Range;

/// Statements that can't run inside a transaction block.
static NON_TRANSACTIONAL: &[&str] = &[
    "create tablespace",
    "create database",
    "cluster",
    "drop",
    "discard",
    "reindex",
    "rollback",
    "vacuum",
];

/// Case-insensitive prefix match.
fn starts_with(stmt: &[u8], prefix: &str) -> bool {
    stmt.len() >= prefix.len() && stmt[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Statement opens a transaction block.
pub fn is_transaction_start(stmt: &[u8]) -> bool {
    starts_with(stmt, "begin") || starts_with(stmt, "start")
}

/// Statement can be wrapped into a transaction with the replay script.
pub fn is_transactional(stmt: &[u8]) -> bool {
    !NON_TRANSACTIONAL
        .iter()
        .any(|prefix| starts_with(stmt, prefix))
}

/// `'value'` with embedded quotes doubled.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"name"` with embedded double quotes doubled.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Replay script of one client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GucState {
    gucs: Vec<u8>,
    /// One entry per request the backend hasn't answered with
    /// ReadyForQuery yet: the part of the script that request added.
    requests: VecDeque<Option<Range<usize>>>,
}

impl GucState {
    /// Multi-tenant clients share a pool with other roles, so their
    /// role is switched at the start of every transaction.
    pub fn multi_tenant(user: &str) -> Self {
        Self {
            gucs: format!("set local role {};", quote_identifier(user)).into_bytes(),
            requests: VecDeque::new(),
        }
    }

    /// Replay a startup option with every transaction.
    pub fn startup_option(&mut self, name: &str, value: &str) {
        self.gucs.extend_from_slice(
            format!(
                "set local {}={};",
                quote_identifier(name),
                quote_literal(value)
            )
            .as_bytes(),
        );
    }

    /// Current replay script.
    pub fn script(&self) -> &[u8] {
        &self.gucs
    }

    pub fn is_empty(&self) -> bool {
        self.gucs.is_empty()
    }

    /// Requests waiting for ReadyForQuery.
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    /// A request that doesn't touch the script (Sync, FunctionCall,
    /// or a query inside a transaction block).
    pub fn request(&mut self) {
        self.requests.push_back(None);
    }

    /// The oldest request got its ReadyForQuery.
    pub fn answered(&mut self) {
        self.requests.pop_front();
    }

    /// Inspect a simple query sent outside of a transaction.
    ///
    /// `stmt` is the query text without the terminating nul. Returns
    /// the replacement text if the statement has to be rewritten.
    /// `in_transaction` is set when the statement opens a transaction block.
    pub fn on_query(&mut self, stmt: &[u8], in_transaction: &mut bool) -> Option<Vec<u8>> {
        let is_set = starts_with(stmt, "set") && !starts_with(&stmt[3..], " local");
        let is_reset = starts_with(stmt, "reset");

        if is_set || is_reset {
            let mut fragment = b"set local".to_vec();

            // Fragments end with a newline so a trailing `--` comment
            // can't swallow what follows them.
            if is_reset {
                let param = &stmt[5..];
                let end = memchr::memchr(b';', param).unwrap_or(param.len());
                fragment.extend_from_slice(&param[..end]);
                fragment.extend_from_slice(b"\n=default;");
            } else {
                let mut param = &stmt[3..];
                if starts_with(param, " session") {
                    param = &param[8..];
                }
                fragment.extend_from_slice(param);
                if stmt.last() == Some(&b';') {
                    fragment.push(b'\n');
                } else {
                    fragment.extend_from_slice(b"\n;");
                }
            }

            let start = self.gucs.len();
            self.gucs.extend_from_slice(&fragment);
            self.requests.push_back(Some(start..self.gucs.len()));

            // Run the fragment twice: the first one is checked by the
            // server, the second one leaves it in effect for this statement.
            let mut rewritten = fragment.clone();
            rewritten.extend_from_slice(&fragment);
            Some(rewritten)
        } else if !self.gucs.is_empty() && is_transactional(stmt) {
            self.requests.push_back(None);

            if is_transaction_start(stmt) {
                let mut rewritten = stmt.to_vec();
                if stmt.last() != Some(&b';') {
                    rewritten.extend_from_slice(b"\n;");
                }
                rewritten.extend_from_slice(&self.gucs);
                *in_transaction = true;
                Some(rewritten)
            } else {
                let mut rewritten = self.gucs.clone();
                rewritten.extend_from_slice(stmt);
                Some(rewritten)
            }
        } else {
            self.requests.push_back(None);

            if is_transaction_start(stmt) {
                *in_transaction = true;
            }
            None
        }
    }

    /// The server rejected the oldest outstanding request: drop the
    /// `SET`/`RESET` it added to the script, if any.
    pub fn undo(&mut self) -> bool {
        let Some(range) = self.requests.front_mut().and_then(Option::take) else {
            return false;
        };

        let removed = range.len();
        self.gucs.drain(range.clone());

        for later in self.requests.iter_mut().flatten() {
            if later.start >= range.end {
                later.start -= removed;
                later.end -= removed;
            }
        }

        true
    }
}
