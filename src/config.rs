//! Boot options: the out-of-band configuration a peer can be launched with.
//!
//! None of this is required; a peer booted with empty options generates a
//! fresh window id, lands on the default session channel, and lets the mesh
//! compute everything dynamically. Embedders use these knobs to pin a peer
//! onto a named screen, force its relative position, pin a whole layout, or
//! group peers into an explicit session.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{decode_layout, decode_screen_position};
use crate::error::MeshError;
use crate::geometry::{Layout, Point, Size};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootOptions {
    /// Fixed window id, mainly for simulations. Production peers leave this
    /// unset and get a generated id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,

    /// Forces this peer onto the named screen of whatever layout is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_id: Option<String>,

    /// Forces the relative position on the assigned screen. Accepted in any
    /// of the three encodings understood by
    /// [`decode_screen_position`]: prefixed, bare JSON, or `x,y`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_position: Option<String>,

    /// A layout descriptor (`vfl1.` form). Doubles as the pinned static
    /// layout and, absent an explicit `session`, as the session seed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,

    /// Explicit session seed; overrides the descriptor-derived one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    /// Physical display size hint used by screen-similarity matching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_size: Option<Size>,
}

impl BootOptions {
    /// Reads options from a TOML file. Unknown keys are rejected.
    pub fn load(path: &Path) -> Result<Self, MeshError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MeshError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| MeshError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Decoded screen-position override, if one was supplied and parses.
    pub fn screen_position(&self) -> Option<Point> {
        self.screen_position
            .as_deref()
            .and_then(decode_screen_position)
    }

    /// Decoded static layout, if a descriptor was supplied and is valid.
    pub fn static_layout(&self) -> Option<Layout> {
        self.layout.as_deref().and_then(decode_layout)
    }

    /// The string whose hash names the session channel: the explicit
    /// session if set, else the layout descriptor, else empty (which maps
    /// to the default channel).
    pub fn session_seed(&self) -> &str {
        self.session
            .as_deref()
            .or(self.layout.as_deref())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_layout;
    use crate::geometry::{Rect, Screen};
    use std::io::Write;

    #[test]
    fn loads_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "screen_id = \"main\"\nscreen_position = \"10,20\"\nsession = \"team-a\"\n\n[display_size]\nw = 2560.0\nh = 1440.0"
        )
        .unwrap();
        let options = BootOptions::load(file.path()).unwrap();
        assert_eq!(options.screen_id.as_deref(), Some("main"));
        assert_eq!(options.screen_position(), Some(Point::new(10.0, 20.0)));
        assert_eq!(options.session_seed(), "team-a");
        assert_eq!(options.display_size, Some(Size::new(2560.0, 1440.0)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "screen_identifier = \"oops\"").unwrap();
        assert!(BootOptions::load(file.path()).is_err());
    }

    #[test]
    fn layout_descriptor_feeds_static_layout_and_seed() {
        let layout = Layout::from_screens(vec![Screen::from_rect(
            "only",
            Rect::new(0.0, 0.0, 800.0, 600.0),
        )])
        .unwrap();
        let options = BootOptions {
            layout: Some(encode_layout(&layout)),
            ..Default::default()
        };
        assert_eq!(options.static_layout(), Some(layout));
        assert_eq!(options.session_seed(), options.layout.as_deref().unwrap());
    }

    #[test]
    fn empty_options_mean_default_session() {
        let options = BootOptions::default();
        assert_eq!(options.session_seed(), "");
        assert!(options.static_layout().is_none());
        assert!(options.screen_position().is_none());
    }
}
