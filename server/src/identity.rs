//! Peer identifiers.
//!
//! A peer is named by a 128-bit identifier in the canonical hyphenated UUID
//! layout (`8-4-4-4-12` hex digits). Every identifier coming off the wire is
//! run through [`parse_peer_id`] before it may touch the registry.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::error::RelayError;

/// Length of the canonical hyphenated form.
const CANONICAL_LEN: usize = 36;

/// Offsets of the four hyphens in the canonical form.
const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// A validated peer identifier. Displays in lowercase hyphenated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for PeerId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_peer_id(s)
    }
}

/// Check that `s` is a canonical hyphenated UUID.
///
/// Braced, URN and hyphen-less spellings are rejected even though they
/// denote a valid 128-bit value.
pub fn validate(s: &str) -> bool {
    if s.len() != CANONICAL_LEN {
        return false;
    }
    let layout_ok = s.char_indices().all(|(i, c)| {
        if HYPHEN_POSITIONS.contains(&i) {
            c == '-'
        } else {
            c.is_ascii_hexdigit()
        }
    });
    layout_ok && Uuid::try_parse(s).is_ok()
}

/// Parse a wire identifier into a [`PeerId`].
pub fn parse_peer_id(s: &str) -> Result<PeerId, RelayError> {
    if !validate(s) {
        return Err(RelayError::InvalidIdentifier);
    }
    Uuid::try_parse(s)
        .map(PeerId)
        .map_err(|_| RelayError::InvalidIdentifier)
}
