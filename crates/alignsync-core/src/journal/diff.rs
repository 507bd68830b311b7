//! Structural diffs between two versions of a link
//!
//! A [`LinkDiff`] lists the fields that changed, each carrying its new
//! value. It is stored as-is in UPDATE journal bodies and only becomes a
//! JSON-Patch style operation list at the wire boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Link, LinkOrigin, LinkStatus};
use crate::reference::Reference;

/// One changed field with its new value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum LinkChange {
    Sources(Vec<Reference>),
    Targets(Vec<Reference>),
    Origin(LinkOrigin),
    Status(LinkStatus),
}

impl LinkChange {
    /// JSON pointer of the field in the wire form of a link
    pub fn path(&self) -> &'static str {
        match self {
            LinkChange::Sources(_) => "/sources",
            LinkChange::Targets(_) => "/targets",
            LinkChange::Origin(_) => "/meta/origin",
            LinkChange::Status(_) => "/meta/status",
        }
    }
}

/// Ordered set of field changes turning one link version into another
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkDiff {
    changes: Vec<LinkChange>,
}

/// A JSON-Patch operation as exchanged with the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

impl LinkDiff {
    /// Compute the changes from `old` to `new`
    ///
    /// Member lists are compared after normalization, so reordering alone
    /// is not a change.
    pub fn between(old: &Link, new: &Link) -> Self {
        let mut old = old.clone();
        let mut new = new.clone();
        old.normalize();
        new.normalize();

        let mut changes = Vec::new();
        if old.sources != new.sources {
            changes.push(LinkChange::Sources(new.sources));
        }
        if old.targets != new.targets {
            changes.push(LinkChange::Targets(new.targets));
        }
        if old.meta.origin != new.meta.origin {
            changes.push(LinkChange::Origin(new.meta.origin));
        }
        if old.meta.status != new.meta.status {
            changes.push(LinkChange::Status(new.meta.status));
        }
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[LinkChange] {
        &self.changes
    }

    /// Apply the changes to `link` in place
    pub fn apply(&self, link: &mut Link) {
        for change in &self.changes {
            match change {
                LinkChange::Sources(refs) => link.sources = refs.clone(),
                LinkChange::Targets(refs) => link.targets = refs.clone(),
                LinkChange::Origin(origin) => link.meta.origin = *origin,
                LinkChange::Status(status) => link.meta.status = *status,
            }
        }
        link.normalize();
    }

    /// Wire form: one `replace` operation per changed field
    pub fn to_patch(&self) -> Vec<PatchOperation> {
        self.changes
            .iter()
            .map(|change| {
                let value = match change {
                    LinkChange::Sources(refs) | LinkChange::Targets(refs) => {
                        Value::Array(refs.iter().map(|r| Value::String(r.encode())).collect())
                    }
                    LinkChange::Origin(origin) => Value::String(origin.as_str().to_string()),
                    LinkChange::Status(status) => Value::String(status.as_str().to_string()),
                };
                PatchOperation {
                    op: "replace".to_string(),
                    path: change.path().to_string(),
                    value,
                }
            })
            .collect()
    }

    /// Parse a wire patch back into a diff
    ///
    /// Only whole-field `replace` operations on known paths are accepted.
    pub fn from_patch(operations: &[PatchOperation]) -> Result<Self> {
        let mut changes = Vec::with_capacity(operations.len());
        for operation in operations {
            if operation.op != "replace" {
                return Err(Error::validation(format!(
                    "unsupported patch operation '{}' on '{}'",
                    operation.op, operation.path
                )));
            }
            let value = operation.value.clone();
            let change = match operation.path.as_str() {
                "/sources" => LinkChange::Sources(serde_json::from_value(value)?),
                "/targets" => LinkChange::Targets(serde_json::from_value(value)?),
                "/meta/origin" => LinkChange::Origin(serde_json::from_value(value)?),
                "/meta/status" => LinkChange::Status(serde_json::from_value(value)?),
                other => {
                    return Err(Error::validation(format!("unsupported patch path '{}'", other)))
                }
            };
            changes.push(change);
        }
        Ok(Self { changes })
    }
}
