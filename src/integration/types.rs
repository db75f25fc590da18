use std::{fmt, str::FromStr, sync::Arc};

use sha1::{Digest, Sha1};

use crate::{metadata::signatures::MethodSignature, Error, Result};

/// A four-part assembly version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    #[allow(missing_docs)]
    pub major: u16,
    #[allow(missing_docs)]
    pub minor: u16,
    #[allow(missing_docs)]
    pub build: u16,
    #[allow(missing_docs)]
    pub revision: u16,
}

impl Version {
    /// The lowest possible version, `0.0.0.0`.
    pub const MIN: Version = Version::new(0, 0, 0, 0);
    /// The highest possible version, `65535.65535.65535.65535`.
    pub const MAX: Version = Version::new(u16::MAX, u16::MAX, u16::MAX, u16::MAX);

    /// Create a version from its four parts.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Version {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Parse `major[.minor[.build[.revision]]]`; missing parts are zero.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = [0_u16; 4];
        let mut count = 0;
        for (index, part) in s.trim().split('.').enumerate() {
            if index >= parts.len() {
                return Err(malformed_error!("Version has too many parts - {}", s));
            }
            parts[index] = part
                .trim()
                .parse()
                .map_err(|_| malformed_error!("Invalid version - {}", s))?;
            count += 1;
        }

        if count == 0 {
            return Err(malformed_error!("Empty version"));
        }

        Ok(Version::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// A fully qualified assembly reference as written in integration definitions.
///
/// # Examples
///
/// ```rust
/// use dotweave::integration::{AssemblyReference, Version};
///
/// let reference = AssemblyReference::parse(
///     "Acme.Tracing, Version=1.2.0.0, Culture=neutral, PublicKeyToken=def86d061d0d2eeb",
/// );
/// assert_eq!(reference.name, "Acme.Tracing");
/// assert_eq!(reference.version, Version::new(1, 2, 0, 0));
/// assert_eq!(reference.public_key_token, [0xde, 0xf8, 0x6d, 0x06, 0x1d, 0x0d, 0x2e, 0xeb]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AssemblyReference {
    /// Simple assembly name
    pub name: String,
    /// Version, `0.0.0.0` if unspecified
    pub version: Version,
    /// Culture, `neutral` if unspecified
    pub locale: String,
    /// Public key token, all zero if unspecified
    pub public_key_token: [u8; 8],
}

impl AssemblyReference {
    /// Parse `Name[, Version=a.b.c.d][, Culture=x][, PublicKeyToken=hex]`.
    ///
    /// Unknown or malformed properties are ignored; the name is everything before the first
    /// comma.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(',');
        let name = parts.next().unwrap_or_default().trim().to_string();

        let mut reference = AssemblyReference {
            name,
            version: Version::default(),
            locale: "neutral".to_string(),
            public_key_token: [0; 8],
        };

        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "Version" => {
                    if let Ok(version) = value.parse() {
                        reference.version = version;
                    }
                }
                "Culture" => reference.locale = value.to_string(),
                "PublicKeyToken" => {
                    if let Some(token) = parse_public_key_token(value) {
                        reference.public_key_token = token;
                    }
                }
                _ => {}
            }
        }

        reference
    }

    /// Returns true if the reference carries a public key token.
    #[must_use]
    pub fn has_public_key_token(&self) -> bool {
        self.public_key_token != [0; 8]
    }
}

impl fmt::Display for AssemblyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Version={}, Culture={}, PublicKeyToken=",
            self.name, self.version, self.locale
        )?;
        if self.has_public_key_token() {
            for byte in self.public_key_token {
                write!(f, "{byte:02x}")?;
            }
            Ok(())
        } else {
            write!(f, "null")
        }
    }
}

fn parse_public_key_token(value: &str) -> Option<[u8; 8]> {
    if value.len() != 16 || !value.is_ascii() {
        return None;
    }

    let mut token = [0_u8; 8];
    for (index, byte) in token.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&value[index * 2..index * 2 + 2], 16).ok()?;
    }
    Some(token)
}

/// Restricts a rule to call sites inside specific assemblies, types or methods.
///
/// An unset field does not restrict anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerRestriction {
    /// Simple name of the calling assembly
    pub assembly: Option<String>,
    /// Fully qualified name of the calling type
    pub type_name: Option<String>,
    /// Name of the calling method
    pub method_name: Option<String>,
}

impl CallerRestriction {
    /// Returns true if `assembly_name` satisfies the assembly restriction.
    #[must_use]
    pub fn allows_assembly(&self, assembly_name: &str) -> bool {
        self.assembly
            .as_deref()
            .map_or(true, |assembly| assembly == assembly_name)
    }

    /// Returns true if a method `method_name` on `type_name` satisfies the type and method
    /// restrictions.
    #[must_use]
    pub fn allows_method(&self, type_name: &str, method_name: &str) -> bool {
        self.type_name
            .as_deref()
            .map_or(true, |expected| expected == type_name)
            && self
                .method_name
                .as_deref()
                .map_or(true, |expected| expected == method_name)
    }
}

/// The call target a rule looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMethod {
    /// Simple name of the assembly declaring the target
    pub assembly: String,
    /// Fully qualified name of the declaring type
    pub type_name: String,
    /// Method name
    pub method_name: String,
    /// Return type followed by parameter types; `_` matches any type. A rule without types
    /// never matches, since every signature has at least a return type.
    pub signature_types: Vec<String>,
    /// Lowest matching version of the target assembly
    pub min_version: Version,
    /// Highest matching version of the target assembly
    pub max_version: Version,
}

impl Default for TargetMethod {
    fn default() -> Self {
        TargetMethod {
            assembly: String::new(),
            type_name: String::new(),
            method_name: String::new(),
            signature_types: Vec::new(),
            min_version: Version::MIN,
            max_version: Version::MAX,
        }
    }
}

impl TargetMethod {
    /// Returns true if `version` falls inside the rule's version range.
    #[must_use]
    pub fn matches_version(&self, version: Version) -> bool {
        self.min_version <= version && version <= self.max_version
    }

    /// Returns true if `actual` (return type then parameters) satisfies the type pattern.
    ///
    /// The comparison is positional and requires equal lengths.
    #[must_use]
    pub fn matches_types(&self, actual: &[String]) -> bool {
        if self.signature_types.len() != actual.len() {
            return false;
        }

        self.signature_types
            .iter()
            .zip(actual)
            .all(|(expected, actual)| expected == WILDCARD || expected == actual)
    }
}

/// Pattern entry matching any type.
pub const WILDCARD: &str = "_";

/// The instrumentation method substituted for the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrapperMethod {
    /// Assembly declaring the wrapper
    pub assembly: AssemblyReference,
    /// Fully qualified name of the declaring type
    pub type_name: String,
    /// Method name
    pub method_name: String,
    /// Full signature: the target's parameters plus the trailing opcode and token parameters
    pub signature: MethodSignature,
}

impl WrapperMethod {
    /// Key identifying the wrapper reference inside one module.
    ///
    /// The key is `[assembly]type.method` followed by a digest of the signature, so overloads
    /// of one wrapper method get distinct member references.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let digest = Sha1::digest(self.signature.data());
        let mut key = format!(
            "[{}]{}.{}#",
            self.assembly.name, self.type_name, self.method_name
        );
        for byte in &digest[..8] {
            key.push_str(&format!("{byte:02x}"));
        }
        key
    }
}

/// One call-site replacement rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodReplacement {
    /// Where the rule applies
    pub caller: CallerRestriction,
    /// What the rule replaces
    pub target: TargetMethod,
    /// What the rule replaces it with
    pub wrapper: WrapperMethod,
}

/// A named bundle of replacement rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Integration {
    /// Integration name, used to disable it through configuration
    pub name: String,
    /// The rules of this integration
    pub method_replacements: Vec<Arc<MethodReplacement>>,
}

/// A single rule together with the name of the integration that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationMethod {
    /// Name of the owning integration
    pub integration_name: Arc<str>,
    /// The rule
    pub replacement: Arc<MethodReplacement>,
}
