//! Out-of-band codecs: layout descriptors, screen-position overrides, and
//! the session-channel derivation.
//!
//! A layout descriptor is the string form of a [`Layout`] that can travel
//! through boot configuration (query strings, config files, copy-paste):
//! a fixed prefix followed by URL-encoded JSON. Decoding is strict; anything
//! that does not parse back into a valid layout yields `None`.
//!
//! The same descriptor string doubles as the session seed: peers booting
//! with equal descriptors hash onto the same broadcast channel and therefore
//! find each other without any handshake.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::geometry::{Layout, Point, LAYOUT_VERSION};

/// Prefix of an encoded layout descriptor.
pub const LAYOUT_DESCRIPTOR_PREFIX: &str = "vfl1.";

/// Prefix of an encoded screen-position override.
pub const POSITION_PREFIX: &str = "pos1.";

/// Session channel used when no seed is configured.
pub const DEFAULT_SESSION: &str = "default";

/// Prefix of derived session channel names.
pub const SESSION_PREFIX: &str = "vm-";

// Keep the characters that JavaScript's encodeURIComponent keeps, so
// descriptors produced elsewhere decode identically.
const DESCRIPTOR_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Encodes a layout as a portable descriptor string.
pub fn encode_layout(layout: &Layout) -> String {
    let json = serde_json::to_string(layout).expect("layout serialisation is infallible");
    format!(
        "{}{}",
        LAYOUT_DESCRIPTOR_PREFIX,
        utf8_percent_encode(&json, DESCRIPTOR_SET)
    )
}

/// Decodes a layout descriptor. Strict: wrong prefix, undecodable escape
/// sequences, schema mismatch, wrong version, or an invalid layout all
/// yield `None`.
pub fn decode_layout(descriptor: &str) -> Option<Layout> {
    let encoded = descriptor.strip_prefix(LAYOUT_DESCRIPTOR_PREFIX)?;
    let json = percent_decode_str(encoded).decode_utf8().ok()?;
    let layout: Layout = serde_json::from_str(&json).ok()?;
    if layout.version != LAYOUT_VERSION {
        return None;
    }
    layout.validate().ok()?;
    Some(layout)
}

/// Encodes a screen-position override in its prefixed form.
pub fn encode_screen_position(position: &Point) -> String {
    let json = serde_json::to_string(position).expect("point serialisation is infallible");
    format!(
        "{}{}",
        POSITION_PREFIX,
        utf8_percent_encode(&json, DESCRIPTOR_SET)
    )
}

/// Decodes a screen-position override from any of its three accepted
/// encodings: `pos1.<urlencoded JSON>`, bare JSON `{"x":..,"y":..}`, or a
/// comma-separated `x,y` pair.
pub fn decode_screen_position(input: &str) -> Option<Point> {
    let input = input.trim();
    if let Some(encoded) = input.strip_prefix(POSITION_PREFIX) {
        let json = percent_decode_str(encoded).decode_utf8().ok()?;
        return serde_json::from_str(&json).ok();
    }
    if input.starts_with('{') {
        return serde_json::from_str(input).ok();
    }
    let (x, y) = input.split_once(',')?;
    Some(Point::new(
        x.trim().parse().ok()?,
        y.trim().parse().ok()?,
    ))
}

/// 32-bit rolling hash over the UTF-8 bytes of `input`.
///
/// The multiplier-31 scheme is stable across processes and platforms, which
/// is all the session derivation and the screen-assignment tie-break need.
pub fn hash32(input: &str) -> u32 {
    let mut h: u32 = 0;
    for byte in input.as_bytes() {
        h = h.wrapping_mul(31).wrapping_add(u32::from(*byte));
    }
    h
}

/// Maps a layout-descriptor seed to the broadcast channel name shared by
/// every peer booted with the same seed. The empty seed maps to the literal
/// [`DEFAULT_SESSION`].
pub fn session_channel(seed: &str) -> String {
    if seed.is_empty() {
        return DEFAULT_SESSION.to_string();
    }
    format!("{}{:08x}", SESSION_PREFIX, hash32(seed))
}
