//! Plugin view descriptions.
//!
//! The host does not render anything itself; a plugin's
//! `create_view()` returns a [`PluginView`] describing the surface,
//! and whatever shell hosts the manager decides how to draw it.

use serde::{Deserialize, Serialize};

/// The surface a plugin asks the host window to mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginView {
    /// Title shown on the mounted surface.
    pub title: String,
    /// What the surface contains.
    pub body: ViewBody,
}

/// Content of a plugin view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewBody {
    /// A block of informational text.
    Text { content: String },
    /// A set of openable links (e.g. pages on a plugin-owned server).
    Links { entries: Vec<ViewLink> },
}

/// One openable entry in a [`ViewBody::Links`] view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewLink {
    /// Human-readable label.
    pub label: String,
    /// Target path or URL.
    pub href: String,
}

impl PluginView {
    /// A plain text view.
    pub fn text(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: ViewBody::Text {
                content: content.into(),
            },
        }
    }

    /// A link-panel view.
    pub fn links(title: impl Into<String>, entries: Vec<ViewLink>) -> Self {
        Self {
            title: title.into(),
            body: ViewBody::Links { entries },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_view_shape() {
        let view = PluginView::text("Demo", "hello");
        assert_eq!(view.title, "Demo");
        assert!(matches!(view.body, ViewBody::Text { ref content } if content == "hello"));
    }

    #[test]
    fn links_view_round_trip() {
        let view = PluginView::links(
            "Web Toolkit",
            vec![ViewLink {
                label: "JSON Formatter".into(),
                href: "/json-formatter".into(),
            }],
        );
        let json = serde_json::to_string(&view).unwrap();
        let back: PluginView = serde_json::from_str(&json).unwrap();
        assert_eq!(back, view);
    }
}
