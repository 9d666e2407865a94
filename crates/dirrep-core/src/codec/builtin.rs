//! Built-in codecs

use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::table;
use super::{Codec, CodecResult};

/// The codecs every registry starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinCodec {
    /// MessagePack, the default
    Native,
    /// Pretty-printed JSON
    Json,
    Yaml,
    /// TOML; the value must be a table without nulls
    Toml,
    /// A single string as UTF-8 text
    Text,
    /// Numbers, vectors or matrices as whitespace-separated rows
    TextTable,
    /// Copied system files; can be neither dumped nor pulled
    Opaque,
}

impl BuiltinCodec {
    pub const ALL: [BuiltinCodec; 7] = [
        Self::Native,
        Self::Json,
        Self::Yaml,
        Self::Toml,
        Self::Text,
        Self::TextTable,
        Self::Opaque,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Text => "text",
            Self::TextTable => "text-table",
            Self::Opaque => "opaque",
        }
    }

    pub fn codec(&self) -> Arc<dyn Codec> {
        Arc::new(Builtin(*self))
    }
}

impl std::fmt::Display for BuiltinCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

struct Builtin(BuiltinCodec);

impl Codec for Builtin {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn dump(&self, path: &Path, value: &Value) -> CodecResult<()> {
        let bytes = match self.0 {
            BuiltinCodec::Native => rmp_serde::to_vec(value)?,
            BuiltinCodec::Json => serde_json::to_vec_pretty(value)?,
            BuiltinCodec::Yaml => serde_yaml::to_string(value)?.into_bytes(),
            BuiltinCodec::Toml => {
                if !value.is_object() {
                    return Err("a TOML document must be a table".into());
                }
                toml::to_string_pretty(value)?.into_bytes()
            }
            BuiltinCodec::Text => value
                .as_str()
                .ok_or("the text codec stores a single string")?
                .as_bytes()
                .to_vec(),
            BuiltinCodec::TextTable => table::render(value)?.into_bytes(),
            BuiltinCodec::Opaque => {
                return Err("opaque payloads are copied in, never dumped".into());
            }
        };
        fs::write(path, bytes)?;
        Ok(())
    }

    fn pull(&self, path: &Path) -> CodecResult<Value> {
        if self.0 == BuiltinCodec::Opaque {
            return Err("opaque payloads cannot be pulled".into());
        }
        let bytes = fs::read(path)?;
        let value: Value = match self.0 {
            BuiltinCodec::Native => rmp_serde::from_slice(&bytes)?,
            BuiltinCodec::Json => serde_json::from_slice(&bytes)?,
            BuiltinCodec::Yaml => serde_yaml::from_slice(&bytes)?,
            BuiltinCodec::Toml => toml::from_str(std::str::from_utf8(&bytes)?)?,
            BuiltinCodec::Text => Value::String(String::from_utf8(bytes)?),
            BuiltinCodec::TextTable => table::parse(std::str::from_utf8(&bytes)?)?,
            BuiltinCodec::Opaque => Value::Null,
        };
        Ok(value)
    }

    fn rejects(&self, value: &Value) -> Option<String> {
        match self.0 {
            BuiltinCodec::Toml => value
                .is_null()
                .then(|| "TOML has no null value".to_string()),
            BuiltinCodec::Text => (!value.is_string())
                .then(|| "the text codec stores a single string".to_string()),
            BuiltinCodec::TextTable => table::shape_of(value).err(),
            BuiltinCodec::Opaque => Some("opaque payloads hold no values".to_string()),
            BuiltinCodec::Native | BuiltinCodec::Json | BuiltinCodec::Yaml => None,
        }
    }
}
