//! Change-request numbers and the sortable build identifier derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numbers at or above this value produce identifiers that no longer sort
/// as strings against two-digit identifiers.
const SORTABLE_LIMIT: u64 = 100;

/// A pull-request style change, identified by its host-assigned number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub number: u64,
}

impl ChangeRequest {
    pub fn new(number: u64) -> Self {
        Self { number }
    }

    /// Build identifier for this change request.
    ///
    /// Logs a warning once the number reaches three digits, since the
    /// identifier then sorts before two-digit ones as a string.
    pub fn build_identifier(&self) -> BuildIdentifier {
        if self.number >= SORTABLE_LIMIT {
            tracing::warn!(
                change = %self,
                "build identifier has more than two digits and sorts before two-digit identifiers as a string"
            );
        }
        BuildIdentifier::from_change_number(self.number)
    }

    /// Tag for the "latest dev build" publish: the bare change number.
    pub fn latest_tag(&self) -> String {
        self.number.to_string()
    }

    /// Tag for the pinned dev build publish: `<number>.<build identifier>`.
    pub fn pinned_tag(&self) -> String {
        format!("{}.{}", self.number, BuildIdentifier::from_change_number(self.number))
    }
}

impl fmt::Display for ChangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.number)
    }
}

/// Zero-padded change number used to keep artifact tags sortable.
///
/// Single-digit numbers get a leading `0`; everything else is the plain
/// decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildIdentifier(String);

impl BuildIdentifier {
    pub fn from_change_number(number: u64) -> Self {
        if number < 10 {
            Self(format!("0{number}"))
        } else {
            Self(number.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BuildIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
