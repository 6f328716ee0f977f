//! Collision-resistant, filesystem-safe names for stored uploads.
//!
//! Generated names have the form `<unix-millis>-<18 random digits><.ext>`. The client-supplied
//! file name only ever contributes its extension, and only after directory components are
//! stripped and the extension is checked to be plain alphanumerics.

use chrono::Utc;
use rand::prelude::RngExt;
use rand::rng;

/// Longest extension carried over from the original name.
pub const MAX_EXTENSION_LEN: usize = 16;

const RANDOM_SPACE: u64 = 1_000_000_000_000_000_000; // 18 decimal digits

/// Produces destination names for incoming files.
pub trait NameGenerator: Send + Sync {
    /// Generate a fresh name for a file the client called `original_name`.
    fn generate(&self, original_name: &str) -> String;
}

/// Default generator: wall-clock milliseconds plus a random component.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampNameGenerator;

impl NameGenerator for TimestampNameGenerator {
    fn generate(&self, original_name: &str) -> String {
        let millis = Utc::now().timestamp_millis();
        let random = rng().random_range(0..RANDOM_SPACE);

        match extension_of(original_name) {
            Some(ext) => format!("{millis}-{random:018}.{ext}"),
            None => format!("{millis}-{random:018}"),
        }
    }
}

/// Final path component of a client-supplied name, treating both `/` and `\` as separators.
pub fn base_name(original_name: &str) -> &str {
    original_name.rsplit(['/', '\\']).next().unwrap_or_default()
}

/// The extension of `original_name`, verbatim (case preserved), if it has a usable one.
///
/// This is deliberately narrower than carrying over whatever follows the last dot: the extension
/// becomes part of a name on disk and in a public URL, so only a short alphanumeric one is kept.
/// Returns `None` when there is no dot, the name is a dotfile like `.bashrc`, the extension is
/// empty, longer than [`MAX_EXTENSION_LEN`], or contains anything other than ASCII letters and digits
/// (`photo.tar.gz` keeps `gz`, `photo.p h p` and `photo.png%00` keep nothing).
pub fn extension_of(original_name: &str) -> Option<&str> {
    let base = base_name(original_name);
    let (stem, ext) = base.rsplit_once('.')?;

    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }

    ext.chars().all(|c| c.is_ascii_alphanumeric()).then_some(ext)
}
