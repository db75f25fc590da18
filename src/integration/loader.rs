//! Integration definition files.
//!
//! Definitions are JSON arrays of integrations:
//!
//! ```json
//! [
//!   {
//!     "name": "AdoNet",
//!     "method_replacements": [
//!       {
//!         "caller": { "assembly": "MyApp" },
//!         "target": {
//!           "assembly": "System.Data",
//!           "type": "System.Data.Common.DbCommand",
//!           "method": "ExecuteReader",
//!           "signature_types": ["System.Data.Common.DbDataReader", "_"],
//!           "minimum_major": 4,
//!           "maximum_major": 4
//!         },
//!         "wrapper": {
//!           "assembly": "Acme.Tracing, Version=1.0.0.0, Culture=neutral, PublicKeyToken=def86d061d0d2eeb",
//!           "type": "Acme.Tracing.AdoNet.DbCommandWrappers",
//!           "method": "ExecuteReader",
//!           "signature": "00 04 1C 1C 08 08 0A"
//!         }
//!       }
//!     ]
//!   }
//! ]
//! ```
//!
//! Signatures are either one string of hex bytes or an array whose items are numbers or hex
//! strings (`"0x1C"`). Loading is tolerant: an entry that does not deserialize is logged and
//! skipped, as is a file that cannot be read.

use std::{fs, path::Path};

use serde::Deserialize;
use serde_json::Value;

use crate::{
    integration::{
        AssemblyReference, CallerRestriction, Integration, MethodReplacement, TargetMethod,
        Version, WrapperMethod,
    },
    Result,
};

/// The only replacement action understood by the rewriter.
const REPLACE_TARGET_METHOD: &str = "ReplaceTargetMethod";

#[derive(Deserialize)]
struct IntegrationDef {
    name: String,
    #[serde(default)]
    method_replacements: Vec<Value>,
}

#[derive(Deserialize)]
struct ReplacementDef {
    #[serde(default)]
    caller: CallerDef,
    target: TargetDef,
    wrapper: WrapperDef,
}

#[derive(Deserialize, Default)]
struct CallerDef {
    assembly: Option<String>,
    #[serde(rename = "type")]
    type_name: Option<String>,
    method: Option<String>,
}

#[derive(Deserialize)]
struct TargetDef {
    assembly: String,
    #[serde(rename = "type")]
    type_name: String,
    method: String,
    #[serde(default)]
    signature_types: Vec<String>,
    minimum_major: Option<u16>,
    minimum_minor: Option<u16>,
    minimum_patch: Option<u16>,
    maximum_major: Option<u16>,
    maximum_minor: Option<u16>,
    maximum_patch: Option<u16>,
}

#[derive(Deserialize)]
struct WrapperDef {
    assembly: String,
    #[serde(rename = "type")]
    type_name: String,
    method: String,
    signature: SignatureDef,
    action: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignatureDef {
    Text(String),
    Items(Vec<ByteDef>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteDef {
    Number(u8),
    Text(String),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_hex_byte(text: &str) -> Result<u8> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(malformed_error!("Invalid signature byte - {}", text));
    }
    u8::from_str_radix(digits, 16)
        .map_err(|_| malformed_error!("Invalid signature byte - {}", text))
}

impl SignatureDef {
    fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            SignatureDef::Text(text) => text.split_whitespace().map(parse_hex_byte).collect(),
            SignatureDef::Items(items) => items
                .into_iter()
                .map(|item| match item {
                    ByteDef::Number(byte) => Ok(byte),
                    ByteDef::Text(text) => parse_hex_byte(&text),
                })
                .collect(),
        }
    }
}

impl ReplacementDef {
    fn into_replacement(self) -> Result<MethodReplacement> {
        if let Some(action) = self.wrapper.action.as_deref() {
            if action != REPLACE_TARGET_METHOD {
                return Err(malformed_error!("Unsupported replacement action - {}", action));
            }
        }

        let target = self.target;
        let min_version = Version::new(
            target.minimum_major.unwrap_or(0),
            target.minimum_minor.unwrap_or(0),
            target.minimum_patch.unwrap_or(0),
            0,
        );
        let max_version = Version::new(
            target.maximum_major.unwrap_or(u16::MAX),
            target.maximum_minor.unwrap_or(u16::MAX),
            target.maximum_patch.unwrap_or(u16::MAX),
            u16::MAX,
        );

        Ok(MethodReplacement {
            caller: CallerRestriction {
                assembly: non_empty(self.caller.assembly),
                type_name: non_empty(self.caller.type_name),
                method_name: non_empty(self.caller.method),
            },
            target: TargetMethod {
                assembly: target.assembly,
                type_name: target.type_name,
                method_name: target.method,
                signature_types: target.signature_types,
                min_version,
                max_version,
            },
            wrapper: WrapperMethod {
                assembly: AssemblyReference::parse(&self.wrapper.assembly),
                type_name: self.wrapper.type_name,
                method_name: self.wrapper.method,
                signature: self.wrapper.signature.into_bytes()?.into(),
            },
        })
    }
}

fn integration_from_value(value: Value) -> Option<Integration> {
    let definition: IntegrationDef = match serde_json::from_value(value) {
        Ok(definition) => definition,
        Err(error) => {
            log::warn!("Skipping malformed integration definition: {}", error);
            return None;
        }
    };

    let mut method_replacements = Vec::with_capacity(definition.method_replacements.len());
    for value in definition.method_replacements {
        let replacement = serde_json::from_value::<ReplacementDef>(value)
            .map_err(crate::Error::from)
            .and_then(ReplacementDef::into_replacement);

        match replacement {
            Ok(replacement) => method_replacements.push(replacement.into()),
            Err(error) => log::warn!(
                "Skipping malformed rule of integration {}: {}",
                definition.name,
                error
            ),
        }
    }

    Some(Integration {
        name: definition.name,
        method_replacements,
    })
}

/// Parse integration definitions from a JSON document.
///
/// # Errors
/// Returns [`crate::Error::Json`] if the document is not a JSON array. Malformed entries
/// inside the array are skipped.
pub fn load_integrations_from_str(json: &str) -> Result<Vec<Integration>> {
    let entries: Vec<Value> = serde_json::from_str(json)?;
    Ok(entries.into_iter().filter_map(integration_from_value).collect())
}

/// Parse integration definitions from a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read or is not a JSON array.
pub fn load_integrations_from_file(path: &Path) -> Result<Vec<Integration>> {
    let json = fs::read_to_string(path)?;
    load_integrations_from_str(&json)
}

/// Load and concatenate the definitions of every file in `paths`.
///
/// Files that cannot be loaded are logged and skipped.
pub fn load_integrations<P: AsRef<Path>>(paths: &[P]) -> Vec<Integration> {
    let mut integrations = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match load_integrations_from_file(path) {
            Ok(loaded) => {
                log::debug!(
                    "Loaded {} integrations from {}",
                    loaded.len(),
                    path.display()
                );
                integrations.extend(loaded);
            }
            Err(error) => log::warn!(
                "Unable to load integrations from {}: {}",
                path.display(),
                error
            ),
        }
    }
    integrations
}
