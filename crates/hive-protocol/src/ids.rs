use serde::{Deserialize, Serialize};

/// Generate a newtype wrapper around `String` with standard trait impls.
///
/// Each generated type gets: `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`,
/// `Serialize`/`Deserialize` (transparent), `Display`, `Deref<Target=str>`,
/// `AsRef<str>`, `Borrow<str>`, `From<String>`, `From<&str>`.
macro_rules! newtype_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn into_inner(self) -> String {
                self.0
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

newtype_string! {
    /// Durable identifier for a cell (the primary join key across the data model).
    CellId
}

newtype_string! {
    /// Identifier for a service row, unique per cell.
    ServiceId
}

newtype_string! {
    /// Identifier for the workspace a cell's worktree is rooted in.
    WorkspaceId
}

newtype_string! {
    /// Identifier for a template (external, workspace-config-defined).
    TemplateId
}

newtype_string! {
    /// Correlation id shared by every timing event emitted during one
    /// provisioning run (including retried/resumed attempts).
    RunId
}

newtype_string! {
    /// Durable binding to a remote coding-agent session (`Cell.opencodeSessionId`).
    AgentSessionId
}

newtype_string! {
    /// Identifier of a model provider in the remote agent's catalog (e.g. `"opencode"`).
    ProviderId
}

newtype_string! {
    /// Catalog key for a model within a provider (e.g. `"gpt-5.3-codex"`).
    ModelId
}
