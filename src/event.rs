// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change events.
//!
//! A [`ChangeEvent`] is one mutation read from the replication log. It names
//! the document that changed but carries no body: upserts are resolved
//! against the source of truth at apply time.
//!
//! # Document identity
//!
//! Log records do not always carry the document ID in the same place.
//! Delete-shaped records may put it under an alternate field. [`LogRecord`]
//! checks both while decoding, so by the time a [`ChangeOp`] exists the ID
//! is always present and nothing downstream has to guess.

use crate::error::SourceError;
use crate::position::LogPosition;
use std::fmt;

/// Kind of mutation, without the document ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
}

impl OpKind {
    /// Parse an operation code. Accepts the short codes (`i`, `u`, `d`) and
    /// the long names, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i" | "insert" => Some(OpKind::Insert),
            "u" | "update" => Some(OpKind::Update),
            "d" | "delete" => Some(OpKind::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation together with the ID of the document it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    Insert { document_id: String },
    Update { document_id: String },
    Delete { document_id: String },
}

impl ChangeOp {
    pub fn new(kind: OpKind, document_id: impl Into<String>) -> Self {
        let document_id = document_id.into();
        match kind {
            OpKind::Insert => ChangeOp::Insert { document_id },
            OpKind::Update => ChangeOp::Update { document_id },
            OpKind::Delete => ChangeOp::Delete { document_id },
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            ChangeOp::Insert { .. } => OpKind::Insert,
            ChangeOp::Update { .. } => OpKind::Update,
            ChangeOp::Delete { .. } => OpKind::Delete,
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            ChangeOp::Insert { document_id }
            | ChangeOp::Update { document_id }
            | ChangeOp::Delete { document_id } => document_id,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, ChangeOp::Delete { .. })
    }
}

/// Logical container of a document, `"<database>.<collection>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Parse a namespace. It must contain a `.` with a non-empty database
    /// part before the first dot and a non-empty collection part after it.
    pub fn parse(s: &str) -> Result<Self, SourceError> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self(s.to_string())),
            _ => Err(SourceError::Parse(format!("Invalid namespace: {s:?}"))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One mutation observed on the replication log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub namespace: Namespace,
    pub op: ChangeOp,
    /// Position of this entry in the log.
    pub position: LogPosition,
}

impl ChangeEvent {
    pub fn new(namespace: Namespace, op: ChangeOp, position: LogPosition) -> Self {
        Self {
            namespace,
            op,
            position,
        }
    }

    pub fn document_id(&self) -> &str {
        self.op.document_id()
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }
}

/// Raw fields of a log record before validation.
///
/// `document_id` is the primary location of the ID; `alternate_id` is where
/// delete-shaped records may carry it instead.
#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    pub op: Option<String>,
    pub namespace: Option<String>,
    pub document_id: Option<String>,
    pub alternate_id: Option<String>,
}

impl LogRecord {
    /// Validate the record and turn it into a [`ChangeEvent`].
    pub fn into_event(self, position: LogPosition) -> Result<ChangeEvent, SourceError> {
        let op_str = self
            .op
            .ok_or_else(|| SourceError::Parse("Missing field: op".to_string()))?;
        let kind = OpKind::parse(&op_str)
            .ok_or_else(|| SourceError::Parse(format!("Unknown op type: {op_str}")))?;

        let ns = self
            .namespace
            .ok_or_else(|| SourceError::Parse("Missing field: ns".to_string()))?;
        let namespace = Namespace::parse(&ns)?;

        let document_id = non_empty(self.document_id)
            .or_else(|| non_empty(self.alternate_id))
            .ok_or_else(|| {
                SourceError::Parse(format!("No document id for {kind} at {position}"))
            })?;

        Ok(ChangeEvent::new(namespace, ChangeOp::new(kind, document_id), position))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
