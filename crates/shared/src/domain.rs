use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(CategoryId);
id_newtype!(LinkId);

/// How activating a link is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Shown inside the launcher's content area when the target allows framing.
    #[default]
    App,
    /// Always opened as an external navigation.
    Tab,
}

impl OpenMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Tab => "tab",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: LinkId,
    #[serde(alias = "category_id")]
    pub category_id: CategoryId,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub open_mode: OpenMode,
    #[serde(default = "default_true")]
    pub iframe_compatible: bool,
    #[serde(default, alias = "sort_order")]
    pub sort_order: i64,
}

impl Link {
    /// Whether activation may hand this link to the embedded frame.
    pub fn embeddable(&self) -> bool {
        self.open_mode == OpenMode::App && self.iframe_compatible
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub expanded: bool,
    #[serde(default, alias = "sort_order")]
    pub sort_order: i64,
    #[serde(default)]
    pub links: Vec<Link>,
}
