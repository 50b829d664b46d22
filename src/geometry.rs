//! Canvas geometry: points, sizes, rectangles, screens, and the global
//! layout that peers agree on.
//!
//! All coordinates are `f64` in one shared virtual plane. A [`Layout`] is the
//! canonical description of that plane: a list of screens (one rectangular
//! tile per contributing peer or per physical monitor) plus the `frame`, the
//! axis-aligned bounding box of every screen.

use serde::{Deserialize, Serialize};

use crate::error::MeshError;

/// Layout schema version carried on the wire and in descriptors.
pub const LAYOUT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub w: f64,
    pub h: f64,
}

impl Size {
    pub fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }

    pub fn is_positive(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.w, self.h)
    }

    /// Whether this rect can contribute a screen to the canvas.
    pub fn is_valid_screen(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    /// Smallest rect covering both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.w).max(other.x + other.w);
        let bottom = (self.y + self.h).max(other.y + other.h);
        Rect::new(x, y, right - x, bottom - y)
    }
}

/// One rectangular tile of the canvas, owned by a single peer (dynamic
/// layouts) or naming a physical monitor (pinned layouts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Screen {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl Screen {
    pub fn from_rect(id: impl Into<String>, rect: Rect) -> Self {
        Self {
            id: id.into(),
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            scale: None,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.w, self.h)
    }

    pub fn size(&self) -> Size {
        Size::new(self.w, self.h)
    }
}

/// The globally agreed canvas: every screen, plus their union bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layout {
    #[serde(rename = "v")]
    pub version: u32,
    pub frame: Rect,
    pub screens: Vec<Screen>,
}

impl Layout {
    /// Builds a layout from screens, deriving the frame as their union.
    pub fn from_screens(screens: Vec<Screen>) -> Result<Layout, MeshError> {
        let frame = union_of(&screens)
            .ok_or_else(|| MeshError::InvalidLayout("no screens".into()))?;
        let layout = Layout {
            version: LAYOUT_VERSION,
            frame,
            screens,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Structural validation: non-empty screen list, positive screen sizes,
    /// unique screen ids, and a frame equal to the union of all screens.
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.screens.is_empty() {
            return Err(MeshError::InvalidLayout("no screens".into()));
        }
        for screen in &self.screens {
            if !screen.rect().is_valid_screen() {
                return Err(MeshError::InvalidLayout(format!(
                    "screen {} has non-positive size {}x{}",
                    screen.id, screen.w, screen.h
                )));
            }
        }
        let mut ids: Vec<&str> = self.screens.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(MeshError::InvalidLayout("duplicate screen id".into()));
        }
        let union = union_of(&self.screens).expect("screens checked non-empty");
        if union != self.frame {
            return Err(MeshError::InvalidLayout(format!(
                "frame {:?} is not the union of screens {:?}",
                self.frame, union
            )));
        }
        Ok(())
    }
}

/// Union bounding box of a screen list, `None` when empty.
pub fn union_of(screens: &[Screen]) -> Option<Rect> {
    let mut iter = screens.iter();
    let first = iter.next()?.rect();
    Some(iter.fold(first, |acc, s| acc.union(&s.rect())))
}
