//! Codec registry
//!
//! A codec turns a dynamic [`Value`] into a payload file and back. Codecs
//! are looked up by name; the built-in set is always present and further
//! codecs can be registered per repository handle. The name actually used
//! for a dump is stored with the file so a later pull reproduces it.

mod builtin;
mod table;

pub use builtin::BuiltinCodec;

use dirrep_fs::io;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::{Error, Result};

/// Name of the codec used when none is given.
pub const DEFAULT_CODEC: &str = "native";

/// Result of a codec transform. Any error type converts via `?`.
pub type CodecResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A named dump/pull transform.
///
/// `dump` always receives a temporary path; the registry renames it over
/// the real payload once the codec succeeded.
pub trait Codec: Send + Sync {
    fn name(&self) -> &str;

    fn dump(&self, path: &Path, value: &Value) -> CodecResult<()>;

    fn pull(&self, path: &Path) -> CodecResult<Value>;

    /// Why this codec cannot store `value` on its own, if it cannot.
    ///
    /// Only used to point at the culprit inside a failed dump.
    fn rejects(&self, _value: &Value) -> Option<String> {
        None
    }
}

/// The codecs available to a repository handle.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: BTreeMap<String, Arc<dyn Codec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let codecs = BuiltinCodec::ALL
            .iter()
            .map(|builtin| (builtin.name().to_string(), builtin.codec()))
            .collect();
        Self { codecs }
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.codecs.keys()).finish()
    }
}

impl CodecRegistry {
    /// A registry holding the built-in codecs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a custom codec.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateCodec`] if the name is taken, built-ins included.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Result<()> {
        let name = codec.name().to_string();
        if self.codecs.contains_key(&name) {
            return Err(Error::DuplicateCodec { name });
        }
        tracing::debug!(codec = %name, "registered codec");
        self.codecs.insert(name, codec);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCodec {
                name: name.to_string(),
            })
    }

    /// Dump `value` to `path` atomically with the named codec.
    ///
    /// On failure the message names the nested value the codec rejects,
    /// when it can be found.
    pub fn dump(&self, name: &str, path: &Path, value: &Value) -> Result<()> {
        let codec = self.get(name)?;
        io::write_atomic_with(path, |temp| {
            codec.dump(temp, value).map_err(|err| {
                let mut message = err.to_string();
                if let Some(culprit) = describe_rejection(codec.as_ref(), value) {
                    message = format!("{message} ({culprit})");
                }
                Error::Codec {
                    codec: name.to_string(),
                    path: path.to_path_buf(),
                    message,
                }
            })
        })
    }

    /// Pull the value stored at `path` with the named codec.
    pub fn pull(&self, name: &str, path: &Path) -> Result<Value> {
        let codec = self.get(name)?;
        codec.pull(path).map_err(|err| Error::Codec {
            codec: name.to_string(),
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

/// Locate the first, most deeply nested value `codec` rejects.
///
/// Returns a message with the JSON pointer of the culprit, or `None` when
/// the codec does not object to any part of `value`.
pub fn describe_rejection(codec: &dyn Codec, value: &Value) -> Option<String> {
    let (pointer, reason) = locate(codec, value, String::new())?;
    let at = if pointer.is_empty() { "/" } else { pointer.as_str() };
    Some(format!("value at '{at}' rejected: {reason}"))
}

fn locate(codec: &dyn Codec, value: &Value, pointer: String) -> Option<(String, String)> {
    let nested = match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| locate(codec, item, format!("{pointer}/{i}"))),
        Value::Object(map) => map.iter().find_map(|(key, item)| {
            let key = key.replace('~', "~0").replace('/', "~1");
            locate(codec, item, format!("{pointer}/{key}"))
        }),
        _ => None,
    };
    nested.or_else(|| codec.rejects(value).map(|reason| (pointer, reason)))
}
