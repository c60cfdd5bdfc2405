//! Module capability sets.
//!
//! A capability set is a fixed-width bitmask assigned to a module once, at
//! load time. Bit 0 is reserved and never set.

use std::fmt;
use std::ops::BitOr;

/// Immutable bitmask of granted capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u64);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const LOGGING: Self = Self(1 << 1);
    pub const LOGGING_FATAL: Self = Self(1 << 2);
    pub const HTTP_REGISTER: Self = Self(1 << 3);
    pub const HTTP_REGISTER_WILDCARD: Self = Self(1 << 4);
    pub const HTTP_UNREGISTER: Self = Self(1 << 5);
    pub const ALL: Self = Self(
        Self::LOGGING.0
            | Self::LOGGING_FATAL.0
            | Self::HTTP_REGISTER.0
            | Self::HTTP_REGISTER_WILDCARD.0
            | Self::HTTP_UNREGISTER.0,
    );

    /// Build a set from raw bits. The reserved bit 0 is masked off.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & !1)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Any-of check: true if at least one bit of `required` is granted.
    pub const fn has(self, required: Self) -> bool {
        self.0 & required.0 != 0
    }

    /// Parse a configuration name such as `http_register`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "logging" => Some(Self::LOGGING),
            "logging_fatal" => Some(Self::LOGGING_FATAL),
            "http_register" => Some(Self::HTTP_REGISTER),
            "http_register_wildcard" => Some(Self::HTTP_REGISTER_WILDCARD),
            "http_unregister" => Some(Self::HTTP_UNREGISTER),
            "all" => Some(Self::ALL),
            _ => None,
        }
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Free-function form of [`Capabilities::has`].
pub fn has_capabilities(capset: Capabilities, required: Capabilities) -> bool {
    capset.has(required)
}
