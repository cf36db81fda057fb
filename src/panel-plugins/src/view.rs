//! UI trees produced by plugin components.
//!
//! The host owns the actual widgets; plugins describe what to show as a
//! serialisable [`View`] tree that the host maps onto its own primitives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A node in a rendered UI tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum View {
    /// A host primitive (`card`, `table`, `button`, ...) with attributes.
    Element {
        tag: String,
        #[serde(default)]
        attrs: BTreeMap<String, Value>,
        #[serde(default)]
        children: Vec<View>,
    },
    /// Plain text.
    Text { text: String },
    /// A host-drawn placeholder (loading, not found, error, denied).
    Placeholder {
        kind: PlaceholderKind,
        title: String,
        message: String,
    },
}

/// Kind of host-drawn placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKind {
    Spinner,
    NotFound,
    AccessDenied,
    Error,
}

impl View {
    /// Create an element without attributes.
    pub fn element(tag: impl Into<String>) -> Self {
        Self::Element {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Create a text node.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Set an attribute. No-op on non-element nodes.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Self::Element { ref mut attrs, .. } = self {
            attrs.insert(key.into(), value.into());
        }
        self
    }

    /// Append a child. No-op on non-element nodes.
    pub fn child(mut self, child: View) -> Self {
        if let Self::Element {
            ref mut children, ..
        } = self
        {
            children.push(child);
        }
        self
    }

    /// Create a placeholder.
    pub fn placeholder(
        kind: PlaceholderKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Placeholder {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// What a component produced for one render call.
#[derive(Debug, Clone, PartialEq)]
pub enum Render {
    /// Finished tree.
    Ready(View),
    /// The component defers rendering (lazy code not yet available).
    Pending,
}
