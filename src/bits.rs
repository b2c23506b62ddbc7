//! Permission bits, presets and mask algebra

use crate::error::{AclError, Result};

/// A permission bitmask. Only the low five bits are meaningful.
pub type Mask = u32;

// Capability bits (stable, never renumbered)
pub const READ: Mask = 1;
pub const WRITE: Mask = 1 << 1;
pub const EXECUTE: Mask = 1 << 2;
pub const DELETE: Mask = 1 << 3;
pub const MANAGE_PERMISSIONS: Mask = 1 << 4;

/// Every defined bit
pub const ALL_BITS: Mask = READ | WRITE | EXECUTE | DELETE | MANAGE_PERMISSIONS;

// Capability name mappings
const CAPS: &[(&str, Mask)] = &[
    ("read", READ),
    ("write", WRITE),
    ("execute", EXECUTE),
    ("delete", DELETE),
    ("manage_permissions", MANAGE_PERMISSIONS),
];

/// Named conventional masks. Display only; entries store the raw mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    None,
    ReadOnly,
    Contributor,
    Editor,
    FullControl,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::None,
        Preset::ReadOnly,
        Preset::Contributor,
        Preset::Editor,
        Preset::FullControl,
    ];

    pub const fn mask(self) -> Mask {
        match self {
            Preset::None => 0,
            Preset::ReadOnly => READ,
            Preset::Contributor => READ | WRITE | EXECUTE,
            Preset::Editor => READ | WRITE | EXECUTE | DELETE,
            Preset::FullControl => ALL_BITS,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Preset::None => "None",
            Preset::ReadOnly => "Read Only",
            Preset::Contributor => "Contributor",
            Preset::Editor => "Editor",
            Preset::FullControl => "Full Control",
        }
    }

    /// Look up a preset by name. Case, spaces, `-` and `_` are ignored,
    /// so `read_only`, `ReadOnly` and `Read Only` all match.
    pub fn from_name(name: &str) -> Option<Preset> {
        let norm: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().replace(' ', "").to_lowercase() == norm)
    }

    pub fn from_mask(mask: Mask) -> Option<Preset> {
        Preset::ALL.into_iter().find(|p| p.mask() == mask)
    }
}

#[inline]
pub fn has_bit(mask: Mask, bit: Mask) -> bool {
    mask & bit == bit
}

/// Bitwise OR of all masks
#[inline]
pub fn combine<I: IntoIterator<Item = Mask>>(masks: I) -> Mask {
    masks.into_iter().fold(0, |a, b| a | b)
}

/// Deny wins bit-for-bit: `allow & !deny`, kept within the defined bits
#[inline]
pub fn apply(allow: Mask, deny: Mask) -> Mask {
    allow & !deny & ALL_BITS
}

/// Name of the matching preset, or None for a custom combination
pub fn preset_name(mask: Mask) -> Option<&'static str> {
    Preset::from_mask(mask).map(Preset::as_str)
}

/// Reject masks with bits outside the five defined ones
pub fn validate(mask: Mask) -> Result<Mask> {
    if mask & !ALL_BITS != 0 {
        return Err(AclError::InvalidMask(mask));
    }
    Ok(mask)
}

/// Convert a mask to a list of capability names
pub fn names(mask: Mask) -> Vec<&'static str> {
    CAPS.iter()
        .filter(|(_, b)| mask & b == *b)
        .map(|(n, _)| *n)
        .collect()
}

/// Convert a list of capability names to a mask; unknown names are ignored
pub fn from_names(names: &[&str]) -> Mask {
    names
        .iter()
        .filter_map(|n| CAPS.iter().find(|(k, _)| k.eq_ignore_ascii_case(n)).map(|(_, v)| *v))
        .fold(0, |a, b| a | b)
}

/// Human-readable form: the preset name, or `custom(n)`
pub fn describe(mask: Mask) -> String {
    match preset_name(mask) {
        Some(name) => name.to_string(),
        None => format!("custom({})", mask),
    }
}

/// True when `a` holds every bit of `b` plus at least one more
#[inline]
pub fn is_strict_superset(a: Mask, b: Mask) -> bool {
    a != b && a & b == b
}
