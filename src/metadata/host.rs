//! Metadata interfaces supplied by the hosting runtime.
//!
//! The runtime owns the metadata of every loaded module and exposes it through import
//! (read) and emit (write) interfaces. These traits describe the subset of those interfaces
//! the instrumentation engine calls. Implementations are provided by the native boundary in
//! production and by in-memory fakes in tests.
//!
//! Every call returns a [`HostResult`], carrying the runtime's raw [`HResult`] on failure.
//! Callers turn those into [`crate::Error::HostCall`] where they need to propagate them.

use std::{fmt, sync::Arc};

use widestring::{U16Str, U16String};

use crate::metadata::token::Token;

/// A 32-bit status code as returned by the runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

#[allow(clippy::cast_possible_wrap)]
impl HResult {
    /// Success
    pub const S_OK: HResult = HResult(0);
    /// Success, but the call had nothing to do
    pub const S_FALSE: HResult = HResult(1);
    /// Unspecified failure
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    /// Requested interface is not supported
    pub const E_NOINTERFACE: HResult = HResult(0x8000_4002_u32 as i32);
    /// Invalid argument
    pub const E_INVALIDARG: HResult = HResult(0x8007_0057_u32 as i32);
    /// Out of memory
    pub const E_OUTOFMEMORY: HResult = HResult(0x8007_000E_u32 as i32);
    /// The class factory does not support aggregation
    pub const CLASS_E_NOAGGREGATION: HResult = HResult(0x8004_0110_u32 as i32);
    /// A metadata lookup found no matching record
    pub const CLDB_E_RECORD_NOTFOUND: HResult = HResult(0x8013_1130_u32 as i32);

    /// Returns true for success codes (severity bit clear).
    #[must_use]
    pub fn succeeded(self) -> bool {
        self.0 >= 0
    }

    /// Returns true for failure codes.
    #[must_use]
    pub fn failed(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[allow(clippy::cast_sign_loss)]
        let raw = self.0 as u32;
        write!(f, "0x{raw:08x}")
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult({self})")
    }
}

/// Result of a call into the runtime.
pub type HostResult<T> = std::result::Result<T, HResult>;

/// Opaque enumeration handle. `0` means no enumeration has been started yet.
pub type EnumHandle = usize;

/// Properties of a `TypeRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRefProps {
    /// Module, module ref, assembly ref or enclosing type ref
    pub resolution_scope: Token,
    /// Fully qualified type name
    pub name: U16String,
}

/// Properties of a `MethodDef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodProps {
    /// Declaring `TypeDef`
    pub class: Token,
    /// Method name
    pub name: U16String,
    /// Method signature blob
    pub signature: Vec<u8>,
}

/// Properties of a `MemberRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRefProps {
    /// Declaring type (`TypeDef`, `TypeRef`, `TypeSpec`), module ref or method def
    pub parent: Token,
    /// Member name
    pub name: U16String,
    /// Member signature blob
    pub signature: Vec<u8>,
}

/// Properties of a `MethodSpec` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpecProps {
    /// The generic `MethodDef` or `MemberRef` being instantiated
    pub parent: Token,
    /// Instantiation blob (`0x0A`, arity, type arguments)
    pub signature: Vec<u8>,
}

/// Version and culture of an assembly or assembly reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyMetadata {
    #[allow(missing_docs)]
    pub major: u16,
    #[allow(missing_docs)]
    pub minor: u16,
    #[allow(missing_docs)]
    pub build: u16,
    #[allow(missing_docs)]
    pub revision: u16,
    /// Culture name, empty for the invariant culture
    pub locale: U16String,
}

/// Properties of an `Assembly` or `AssemblyRef` row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyProps {
    /// Simple assembly name
    pub name: U16String,
    /// Version and culture
    pub metadata: AssemblyMetadata,
    /// Public key or public key token
    pub public_key: Vec<u8>,
    /// Assembly flags
    pub flags: u32,
}

/// Read access to the metadata tables of one module.
///
/// The `enum_*` methods follow the runtime's batched enumeration protocol: pass a handle
/// initialised to `0`, and call repeatedly until an empty batch is returned. The handle must
/// then be released with [`MetadataImport::close_enum`].
/// [`TokenEnumerator`](crate::metadata::enumerator::TokenEnumerator) wraps this protocol.
pub trait MetadataImport: Send + Sync {
    /// Enumerate `TypeDef` tokens.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn enum_type_defs(&self, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>>;
    /// Enumerate `TypeRef` tokens.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn enum_type_refs(&self, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>>;
    /// Enumerate the `MethodDef` tokens of `parent`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn enum_methods(
        &self,
        handle: &mut EnumHandle,
        parent: Token,
        max: usize,
    ) -> HostResult<Vec<Token>>;
    /// Enumerate the `MemberRef` tokens whose parent is `parent`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn enum_member_refs(
        &self,
        handle: &mut EnumHandle,
        parent: Token,
        max: usize,
    ) -> HostResult<Vec<Token>>;
    /// Enumerate `ModuleRef` tokens.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn enum_module_refs(&self, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>>;
    /// Release an enumeration handle.
    fn close_enum(&self, handle: EnumHandle);

    /// Token of the module row of this scope.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_module_from_scope(&self) -> HostResult<Token>;
    /// Fully qualified name of a `TypeDef`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_type_def_props(&self, token: Token) -> HostResult<U16String>;
    /// Properties of a `TypeRef`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_type_ref_props(&self, token: Token) -> HostResult<TypeRefProps>;
    /// Name of a `ModuleRef`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_module_ref_props(&self, token: Token) -> HostResult<U16String>;
    /// Signature blob of a `TypeSpec`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_type_spec_from_token(&self, token: Token) -> HostResult<Vec<u8>>;
    /// Properties of a `MethodDef`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_method_props(&self, token: Token) -> HostResult<MethodProps>;
    /// Properties of a `MemberRef`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_member_ref_props(&self, token: Token) -> HostResult<MemberRefProps>;
    /// Properties of a `MethodSpec`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_method_spec_props(&self, token: Token) -> HostResult<MethodSpecProps>;
    /// Blob of a standalone signature.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_sig_from_token(&self, token: Token) -> HostResult<Vec<u8>>;

    /// Find a `TypeRef` by resolution scope and name.
    ///
    /// # Errors
    /// Returns [`HResult::CLDB_E_RECORD_NOTFOUND`] when no row matches.
    fn find_type_ref(&self, scope: Token, name: &U16Str) -> HostResult<Token>;
    /// Find a top-level `TypeDef` by name.
    ///
    /// # Errors
    /// Returns [`HResult::CLDB_E_RECORD_NOTFOUND`] when no row matches.
    fn find_type_def_by_name(&self, name: &U16Str) -> HostResult<Token>;
    /// Find a `MemberRef` by parent, name and signature.
    ///
    /// # Errors
    /// Returns [`HResult::CLDB_E_RECORD_NOTFOUND`] when no row matches.
    fn find_member_ref(&self, parent: Token, name: &U16Str, signature: &[u8])
        -> HostResult<Token>;
}

/// Read access to the assembly manifest of one module.
pub trait AssemblyImport: Send + Sync {
    /// Token of the assembly row of this scope.
    ///
    /// # Errors
    /// Returns the runtime status on failure, e.g. for modules without a manifest.
    fn get_assembly_from_scope(&self) -> HostResult<Token>;
    /// Properties of the `Assembly` row.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_assembly_props(&self, token: Token) -> HostResult<AssemblyProps>;
    /// Enumerate `AssemblyRef` tokens, same protocol as [`MetadataImport`].
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn enum_assembly_refs(&self, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>>;
    /// Properties of an `AssemblyRef` row.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn get_assembly_ref_props(&self, token: Token) -> HostResult<AssemblyProps>;
    /// Release an enumeration handle.
    fn close_enum(&self, handle: EnumHandle);
}

/// Write access to the metadata tables of one module.
pub trait MetadataEmit: Send + Sync {
    /// Define a `TypeRef` under `scope`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn define_type_ref_by_name(&self, scope: Token, name: &U16Str) -> HostResult<Token>;
    /// Define a `MemberRef` on `parent`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn define_member_ref(&self, parent: Token, name: &U16Str, signature: &[u8])
        -> HostResult<Token>;
    /// Define a `MethodSpec` instantiating `parent` with `instantiation`.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn define_method_spec(&self, parent: Token, instantiation: &[u8]) -> HostResult<Token>;
}

/// Write access to the assembly manifest of one module.
pub trait AssemblyEmit: Send + Sync {
    /// Define an `AssemblyRef` row.
    ///
    /// # Errors
    /// Returns the runtime status on failure.
    fn define_assembly_ref(&self, props: &AssemblyProps) -> HostResult<Token>;
}

/// The four metadata interfaces of one module, as handed out by the runtime.
#[derive(Clone)]
pub struct MetadataInterfaces {
    /// Table reads
    pub import: Arc<dyn MetadataImport>,
    /// Table writes
    pub emit: Arc<dyn MetadataEmit>,
    /// Manifest reads
    pub assembly_import: Arc<dyn AssemblyImport>,
    /// Manifest writes
    pub assembly_emit: Arc<dyn AssemblyEmit>,
}

impl fmt::Debug for MetadataInterfaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataInterfaces").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hresult_severity() {
        assert!(HResult::S_OK.succeeded());
        assert!(HResult::S_FALSE.succeeded());
        assert!(HResult::E_FAIL.failed());
        assert!(HResult::CLASS_E_NOAGGREGATION.failed());
        assert!(!HResult::E_NOINTERFACE.succeeded());
    }

    #[test]
    fn hresult_display() {
        assert_eq!(HResult::E_FAIL.to_string(), "0x80004005");
        assert_eq!(format!("{:?}", HResult::S_OK), "HResult(0x00000000)");
    }
}
