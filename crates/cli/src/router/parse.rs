// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger line grammar.
//!
//! Sequenced lines have the shape `(SENDER #N): body` where `SENDER` is an
//! uppercase role token and `N` a positive integer. Anything else is still
//! delivered — verbatim, unsequenced, exempt from dedup.

use std::sync::OnceLock;

use regex::Regex;

/// Exact substring that marks a sender restart when paired with `seq == 1`.
pub const SESSION_BANNER: &str = "# HIVEMIND SESSION:";

/// One trigger line after grammar extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// Uppercase sender token. `None` for unsequenced lines.
    pub sender: Option<String>,
    /// Positive, monotonic per sender. `None` for unsequenced lines.
    pub seq: Option<u64>,
    /// Message body after the prefix; the whole line when unsequenced.
    pub body: String,
    /// The original line, which is what actually gets injected.
    pub raw: String,
}

impl ParsedLine {
    /// Whether this message signals a sender session restart.
    pub fn session_banner(&self) -> bool {
        self.body.contains(SESSION_BANNER)
    }
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Literal pattern, exercised by every parser test.
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"^\(([A-Z][A-Z0-9_]*) #([0-9]+)\):\s?(.*)$").unwrap();
        re
    })
}

/// Parse one trigger line. Never fails: ill-formed lines come back with
/// `seq: None` and are forwarded verbatim.
pub fn parse(line: &str) -> ParsedLine {
    let raw = line.to_string();
    if let Some(caps) = prefix_re().captures(line) {
        let seq = caps[2].parse::<u64>().ok().filter(|s| *s >= 1);
        if let Some(seq) = seq {
            return ParsedLine {
                sender: Some(caps[1].to_string()),
                seq: Some(seq),
                body: caps[3].to_string(),
                raw,
            };
        }
    }
    ParsedLine { sender: None, seq: None, body: raw.clone(), raw }
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod tests;
