// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Every way a match decode or an action compile can fail.
///
/// None of these carry partial results: a caller that sees an error
/// has nothing to clean up.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum FlowError {
    /// A record's length disagrees with its schema entry.
    #[error("{table} attribute {ty} has length {len}, expected {expected}")]
    MalformedAttr { table: String, ty: u16, len: usize, expected: usize },

    #[error("duplicate {table} attribute {ty}")]
    DuplicateAttr { table: String, ty: u16 },

    #[error("{table} attribute {ty} is out of range (max {max})")]
    UnknownType { table: String, ty: u16, max: u16 },

    /// A record too long for the 16-bit length of its header.
    #[error("attribute {ty} of {len} bytes is too long to encode")]
    AttrTooLong { ty: u16, len: usize },

    /// The stream ended partway through a record.
    #[error("{remaining} trailing bytes after {table} attributes")]
    TrailingBytes { table: String, remaining: usize },

    /// A field value is structurally invalid for its type.
    #[error("invalid field: {0}")]
    Invalid(String),

    #[error("unsupported field combination: {0}")]
    UnsupportedCombination(String),

    /// The key lacks attributes its protocol fields imply.
    #[error(
        "missing key attributes: present {present:#x}, expected {expected:#x}"
    )]
    MissingRequiredField { present: u64, expected: u64 },

    /// The mask wildcards fields it has not earned the right to.
    #[error("disallowed mask attributes: mask {mask:#x}, allowed {allowed:#x}")]
    DisallowedMaskField { mask: u64, allowed: u64 },

    #[error("action program needs {requested} bytes, cap is {max}")]
    BufferCapacityExceeded { requested: usize, max: usize },

    #[error("failed to allocate {0} bytes")]
    AllocationFailure(usize),

    #[error("action {action} not allowed here: {reason}")]
    IllegalActionForProtocol { action: u16, reason: String },

    #[error("action {action} breaks link-layer framing: {reason}")]
    InvalidFramingTransition { action: u16, reason: String },

    #[error("unknown action type {0}")]
    UnknownActionType(u16),
}

impl FlowError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedCombination(msg.into())
    }

    pub fn illegal(action: impl Into<u16>, reason: impl Into<String>) -> Self {
        Self::IllegalActionForProtocol {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn framing(action: impl Into<u16>, reason: impl Into<String>) -> Self {
        Self::InvalidFramingTransition {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the attribute parser rather than
    /// from field or action semantics.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedAttr { .. }
                | Self::DuplicateAttr { .. }
                | Self::UnknownType { .. }
                | Self::TrailingBytes { .. }
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn display() {
        let err = FlowError::DuplicateAttr { table: "key".into(), ty: 7 };
        assert_eq!(err.to_string(), "duplicate key attribute 7");

        let err = FlowError::MissingRequiredField {
            present: 0x50,
            expected: 0x80,
        };
        assert_eq!(
            err.to_string(),
            "missing key attributes: present 0x50, expected 0x80"
        );
    }

    #[test]
    fn classification() {
        let err =
            FlowError::TrailingBytes { table: "key".into(), remaining: 3 };
        assert!(err.is_parse_error());
        assert!(!FlowError::invalid("frag").is_parse_error());
        let err = FlowError::AttrTooLong { ty: 1, len: 70_004 };
        assert!(!err.is_parse_error());
    }
}
