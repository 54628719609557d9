//! Connection path: one segment per hop, plus a cursor naming whose turn it is.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

/// One hop of a connection path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    /// Identity of the hop (client, mesh manager, forwarder, endpoint).
    pub name: String,
    /// Per-hop connection id.
    pub id: String,
    /// Opaque authentication token issued by this hop.
    pub token: String,
    /// When `token` stops being valid.
    pub expires: Option<SystemTime>,
}

impl PathSegment {
    #[must_use]
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Ordered hop list. `index` points at the segment owned by the element
/// currently handling the call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub index: usize,
    pub path_segments: Vec<PathSegment>,
}

impl Path {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path_segments.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.path_segments.len()
    }

    /// Segment at the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&PathSegment> {
        self.path_segments.get(self.index)
    }

    /// Segment of the hop that sent us the call.
    #[must_use]
    pub fn previous(&self) -> Option<&PathSegment> {
        self.index
            .checked_sub(1)
            .and_then(|index| self.path_segments.get(index))
    }

    /// Segment of the hop the call goes to next, if it was seen before.
    #[must_use]
    pub fn next(&self) -> Option<&PathSegment> {
        self.path_segments.get(self.index + 1)
    }

    /// Mutable access to the segment at the cursor, only for its owner.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the cursor is out of range or the
    /// segment at the cursor belongs to another hop.
    pub fn owned_segment_mut(&mut self, name: &str) -> Result<&mut PathSegment> {
        let index = self.index;
        let segment = self.path_segments.get_mut(index).ok_or_else(|| {
            MeshError::InvalidArgument(format!("path index {index} is out of range"))
        })?;
        if segment.name != name {
            return Err(MeshError::InvalidArgument(format!(
                "segment {index} belongs to {}, not {name}",
                segment.name
            )));
        }
        Ok(segment)
    }

    /// Moves the cursor onto the segment owned by `name`, creating it when
    /// the hop is new, and returns the cursor position to restore on unwind.
    ///
    /// An unchanged segment at the cursor or right after it means the call
    /// is a refresh. Any other segment after the cursor is stale and is
    /// dropped. A fresh segment takes `new_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the cursor points past the end.
    pub fn enter(&mut self, name: &str, new_id: impl FnOnce() -> String) -> Result<usize> {
        if self.path_segments.is_empty() {
            self.index = 0;
            self.path_segments.push(PathSegment::new(name, new_id()));
            return Ok(0);
        }

        let previous = self.index;
        let current = self.path_segments.get(previous).ok_or_else(|| {
            MeshError::InvalidArgument(format!(
                "path index {previous} is out of range for {} segments",
                self.path_segments.len()
            ))
        })?;
        if current.name == name {
            return Ok(previous);
        }

        let next = previous + 1;
        if self
            .path_segments
            .get(next)
            .is_some_and(|segment| segment.name == name)
        {
            self.index = next;
            return Ok(previous);
        }

        self.path_segments.truncate(next);
        self.path_segments.push(PathSegment::new(name, new_id()));
        self.index = next;
        Ok(previous)
    }

    /// Drops every segment after the cursor.
    pub fn truncate_after_current(&mut self) {
        self.path_segments.truncate(self.index + 1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
