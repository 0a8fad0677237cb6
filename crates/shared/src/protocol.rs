use serde::{Deserialize, Serialize};

use crate::domain::{CategoryId, OpenMode};

// Request bodies keep the column names the server reads (`category_id`,
// `open_mode`, `iframe_compatible`, `sort_order`); responses are camelCase.

/// Body of `POST /categories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

/// Body of `PUT /categories/{id}`. Only supplied fields are changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl CategoryPatch {
    pub fn expanded(expanded: bool) -> Self {
        Self {
            expanded: Some(expanded),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.expanded.is_none() && self.sort_order.is_none()
    }
}

/// Body of `POST /links`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLink {
    pub category_id: CategoryId,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub open_mode: OpenMode,
    #[serde(default = "default_iframe_compatible")]
    pub iframe_compatible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

fn default_iframe_compatible() -> bool {
    true
}

/// Body of `PUT /links/{id}`. Only supplied fields are changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_mode: Option<OpenMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iframe_compatible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl LinkPatch {
    pub fn iframe_compatible(iframe_compatible: bool) -> Self {
        Self {
            iframe_compatible: Some(iframe_compatible),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.open_mode.is_none()
            && self.iframe_compatible.is_none()
            && self.sort_order.is_none()
    }
}

/// Success acknowledgment for updates and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
