//! Byte-wise transforms applied to every byte a client sends.
//!
//! A transform maps each input byte to exactly one output byte and keeps no
//! state between calls, so it can be applied to each read chunk as it
//! arrives without looking at neighbouring chunks.

use clap::ValueEnum;
use serde::Deserialize;

/// Map a single byte: ASCII lowercase letters become uppercase, every other
/// byte is returned unchanged.
#[inline]
pub fn transform(b: u8) -> u8 {
    b.to_ascii_uppercase()
}

/// A stateless byte-sequence transform, applied in place.
pub trait Transform: Send + Sync {
    /// Rewrite `bytes` in place. Length never changes.
    fn apply(&self, bytes: &mut [u8]);

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// ASCII uppercase transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uppercase;

impl Transform for Uppercase {
    fn apply(&self, bytes: &mut [u8]) {
        for b in bytes.iter_mut() {
            *b = transform(*b);
        }
    }

    fn name(&self) -> &'static str {
        "uppercase"
    }
}

/// Pass-through transform (plain echo).
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, _bytes: &mut [u8]) {}

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Transform selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    Uppercase,
    Identity,
}

impl TransformKind {
    /// Resolve to the transform handed to each new connection.
    pub fn resolve(self) -> &'static dyn Transform {
        match self {
            TransformKind::Uppercase => &Uppercase,
            TransformKind::Identity => &Identity,
        }
    }
}
