//! Definitions emitted into instrumented modules.
//!
//! Redirecting a call to a wrapper method requires the calling module to reference the wrapper:
//! an `AssemblyRef` for the wrapper's assembly, a `TypeRef` for its declaring type and a
//! `MemberRef` for the method itself. [`MetadataBuilder`] creates (or finds) those rows once,
//! at module load, and stores the resulting member reference in the module's
//! [`ModuleRecord`] under the wrapper's cache key. Compilation events then only look tokens up.
//!
//! Emission for a module happens on one thread at a time: at load time before the record is
//! published, and at compile time while the record's lock is held.

use widestring::U16String;

use crate::{
    cache::ModuleRecord,
    integration::{AssemblyReference, WrapperMethod},
    metadata::{
        host::{AssemblyMetadata, AssemblyProps, MetadataEmit},
        resolver,
        token::Token,
    },
    Result,
};

/// Culture name meaning "no culture".
const NEUTRAL_CULTURE: &str = "neutral";

/// Emits wrapper references into the module owning a [`ModuleRecord`].
pub struct MetadataBuilder<'a> {
    record: &'a mut ModuleRecord,
}

impl<'a> MetadataBuilder<'a> {
    /// Create a builder emitting into `record`'s module.
    pub fn new(record: &'a mut ModuleRecord) -> Self {
        MetadataBuilder { record }
    }

    /// Return the module's reference to `assembly`, defining it if needed.
    ///
    /// References are matched by simple name. Calling this repeatedly for the same assembly
    /// yields the same token.
    ///
    /// # Errors
    /// Returns [`crate::Error::HostCall`] if the runtime rejects the definition.
    pub fn emit_assembly_ref(&mut self, assembly: &AssemblyReference) -> Result<Token> {
        let assembly_import = self.record.metadata.assembly_import.as_ref();
        if let Some(existing) = resolver::find_assembly_ref(assembly_import, &assembly.name) {
            return Ok(existing);
        }

        let locale = if assembly.locale == NEUTRAL_CULTURE {
            U16String::new()
        } else {
            U16String::from_str(&assembly.locale)
        };
        let public_key = if assembly.has_public_key_token() {
            assembly.public_key_token.to_vec()
        } else {
            Vec::new()
        };

        let props = AssemblyProps {
            name: U16String::from_str(&assembly.name),
            metadata: AssemblyMetadata {
                major: assembly.version.major,
                minor: assembly.version.minor,
                build: assembly.version.build,
                revision: assembly.version.revision,
                locale,
            },
            public_key,
            flags: 0,
        };

        let token = self
            .record
            .metadata
            .assembly_emit
            .define_assembly_ref(&props)
            .map_err(|hresult| host_error!("DefineAssemblyRef", hresult))?;

        log::debug!(
            "Defined assembly ref {} for {} in {}",
            token,
            assembly,
            self.record.assembly_name
        );
        Ok(token)
    }

    /// Resolve the `TypeDef` or `TypeRef` declaring `wrapper`.
    ///
    /// Wrappers declared in the module's own assembly resolve to their `TypeDef`. Otherwise
    /// the type is looked up under the wrapper's assembly reference, which must exist, and
    /// defined if missing.
    ///
    /// # Errors
    /// Returns an error if the wrapper's assembly is not referenced, the type cannot be found
    /// in the module's own assembly, or the runtime rejects the definition.
    pub fn wrapper_type_ref(&mut self, wrapper: &WrapperMethod) -> Result<Token> {
        let metadata = &self.record.metadata;
        let type_name = U16String::from_str(&wrapper.type_name);

        if wrapper.assembly.name == self.record.assembly_name {
            return metadata
                .import
                .find_type_def_by_name(&type_name)
                .map_err(|hresult| host_error!("FindTypeDefByName", hresult));
        }

        let assembly_ref =
            resolver::find_assembly_ref(metadata.assembly_import.as_ref(), &wrapper.assembly.name)
                .ok_or_else(|| {
                    crate::Error::Error(format!(
                        "Assembly {} is not referenced by {}",
                        wrapper.assembly.name, self.record.assembly_name
                    ))
                })?;

        match metadata.import.find_type_ref(assembly_ref, &type_name) {
            Ok(existing) if !existing.is_nil() => Ok(existing),
            _ => metadata
                .emit
                .define_type_ref_by_name(assembly_ref, &type_name)
                .map_err(|hresult| host_error!("DefineTypeRefByName", hresult)),
        }
    }

    /// Return the member reference of `wrapper`, defining it on first use.
    ///
    /// The token is stored in the record under [`WrapperMethod::cache_key`]; later calls with
    /// the same wrapper return it without touching metadata.
    ///
    /// # Errors
    /// Returns an error if the declaring type cannot be resolved or the runtime rejects the
    /// member reference.
    pub fn store_wrapper_method_ref(&mut self, wrapper: &WrapperMethod) -> Result<Token> {
        let key = wrapper.cache_key();
        if let Some(existing) = self.record.wrapper_member_ref(&key) {
            return Ok(existing);
        }

        let type_ref = self.wrapper_type_ref(wrapper)?;
        let metadata = &self.record.metadata;
        let method_name = U16String::from_str(&wrapper.method_name);
        let signature = wrapper.signature.data();

        let member_ref = match metadata
            .import
            .find_member_ref(type_ref, &method_name, signature)
        {
            Ok(existing) if !existing.is_nil() => existing,
            _ => metadata
                .emit
                .define_member_ref(type_ref, &method_name, signature)
                .map_err(|hresult| host_error!("DefineMemberRef", hresult))?,
        };

        log::debug!(
            "Wrapper {}.{} is {} in {}",
            wrapper.type_name,
            wrapper.method_name,
            member_ref,
            self.record.assembly_name
        );
        self.record.set_wrapper_member_ref(key, member_ref);
        Ok(member_ref)
    }
}

/// Define a `MethodSpec` instantiating `parent` with the type arguments in `instantiation`.
///
/// # Errors
/// Returns [`crate::Error::HostCall`] if the runtime rejects the definition.
pub fn define_method_spec(
    emit: &dyn MetadataEmit,
    parent: Token,
    instantiation: &[u8],
) -> Result<Token> {
    emit.define_method_spec(parent, instantiation)
        .map_err(|hresult| host_error!("DefineMethodSpec", hresult))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{host::HResult, token::TokenType},
        test::metadata::FakeMetadata,
        Error,
    };

    fn wrapper(assembly: &str) -> WrapperMethod {
        WrapperMethod {
            assembly: AssemblyReference::parse(assembly),
            type_name: "Acme.Tracing.DbWrappers".to_string(),
            method_name: "ExecuteReader".to_string(),
            signature: vec![0x00, 0x04, 0x1C, 0x1C, 0x08, 0x08, 0x0A].into(),
        }
    }

    fn record_for(fake: &std::sync::Arc<FakeMetadata>) -> ModuleRecord {
        ModuleRecord::new(1, "MyApp".to_string(), fake.interfaces(), Token::new(1), Vec::new())
    }

    #[test]
    fn assembly_ref_is_idempotent() {
        let fake = FakeMetadata::new("MyApp");
        fake.add_assembly_ref("System.Data", [4, 0, 0, 0]);
        let mut record = record_for(&fake);
        let mut builder = MetadataBuilder::new(&mut record);

        let reference = AssemblyReference::parse(
            "Acme.Tracing, Version=1.0.0.0, Culture=neutral, PublicKeyToken=def86d061d0d2eeb",
        );
        let first = builder.emit_assembly_ref(&reference).unwrap();
        let second = builder.emit_assembly_ref(&reference).unwrap();

        assert_eq!(first, second);
        assert!(first.is_type(TokenType::AssemblyRef));
        assert_eq!(fake.assembly_ref_count(), 2);

        let props = lock!(fake.tables).assembly_refs[1].clone();
        assert_eq!(props.name.to_string_lossy(), "Acme.Tracing");
        assert_eq!(props.metadata.major, 1);
        assert!(props.metadata.locale.is_empty());
        assert_eq!(props.public_key, [0xde, 0xf8, 0x6d, 0x06, 0x1d, 0x0d, 0x2e, 0xeb]);
    }

    #[test]
    fn existing_assembly_ref_is_reused() {
        let fake = FakeMetadata::new("MyApp");
        let existing = fake.add_assembly_ref("Acme.Tracing", [1, 0, 0, 0]);
        let mut record = record_for(&fake);

        let token = MetadataBuilder::new(&mut record)
            .emit_assembly_ref(&AssemblyReference::parse("Acme.Tracing"))
            .unwrap();
        assert_eq!(token, existing);
        assert_eq!(fake.assembly_ref_count(), 1);
    }

    #[test]
    fn wrapper_ref_is_defined_once_and_cached() {
        let fake = FakeMetadata::new("MyApp");
        let mut record = record_for(&fake);
        let wrapper = wrapper("Acme.Tracing");

        let mut builder = MetadataBuilder::new(&mut record);
        builder.emit_assembly_ref(&wrapper.assembly).unwrap();
        let first = builder.store_wrapper_method_ref(&wrapper).unwrap();
        let second = builder.store_wrapper_method_ref(&wrapper).unwrap();

        assert_eq!(first, second);
        assert!(first.is_type(TokenType::MemberRef));
        assert_eq!(fake.member_ref_count(), 1);
        assert_eq!(record.wrapper_member_ref(&wrapper.cache_key()), Some(first));

        let (parent, name, signature) = lock!(fake.tables).member_refs[0].clone();
        assert!(parent.is_type(TokenType::TypeRef));
        assert_eq!(name, "ExecuteReader");
        assert_eq!(signature, wrapper.signature.data());
    }

    #[test]
    fn existing_member_ref_is_reused() {
        let fake = FakeMetadata::new("MyApp");
        let assembly_ref = fake.add_assembly_ref("Acme.Tracing", [1, 0, 0, 0]);
        let type_ref = fake.add_type_ref(assembly_ref, "Acme.Tracing.DbWrappers");
        let wrapper = wrapper("Acme.Tracing");
        let existing = fake.add_member_ref(type_ref, "ExecuteReader", wrapper.signature.data());
        let mut record = record_for(&fake);

        let token = MetadataBuilder::new(&mut record)
            .store_wrapper_method_ref(&wrapper)
            .unwrap();
        assert_eq!(token, existing);
        assert_eq!(fake.member_ref_count(), 1);
    }

    #[test]
    fn wrapper_in_own_assembly_uses_type_def() {
        let fake = FakeMetadata::new("MyApp");
        let type_def = fake.add_type_def("Acme.Tracing.DbWrappers");
        let mut record = record_for(&fake);

        let token = MetadataBuilder::new(&mut record)
            .store_wrapper_method_ref(&wrapper("MyApp"))
            .unwrap();
        let (parent, _, _) = lock!(fake.tables).member_refs[0].clone();
        assert_eq!(parent, type_def);
        assert!(token.is_type(TokenType::MemberRef));
    }

    #[test]
    fn failures_are_reported() {
        let fake = FakeMetadata::new("MyApp");
        let mut record = record_for(&fake);

        // assembly never referenced
        assert!(MetadataBuilder::new(&mut record)
            .store_wrapper_method_ref(&wrapper("Acme.Tracing"))
            .is_err());

        lock!(fake.tables).fail_define_assembly_ref = true;
        assert!(matches!(
            MetadataBuilder::new(&mut record).emit_assembly_ref(&AssemblyReference::parse("Acme.Tracing")),
            Err(Error::HostCall {
                operation: "DefineAssemblyRef",
                hresult: HResult::E_FAIL
            })
        ));

        lock!(fake.tables).fail_define_assembly_ref = false;
        lock!(fake.tables).fail_define_member_ref = true;
        let mut builder = MetadataBuilder::new(&mut record);
        builder
            .emit_assembly_ref(&AssemblyReference::parse("Acme.Tracing"))
            .unwrap();
        assert!(builder
            .store_wrapper_method_ref(&wrapper("Acme.Tracing"))
            .is_err());
        assert_eq!(record.wrapper_ref_count(), 0);
    }

    #[test]
    fn method_spec() {
        let fake = FakeMetadata::new("MyApp");
        let token = define_method_spec(fake.as_ref(), Token::new(0x0A00_0001), &[0x0A, 0x01, 0x0E])
            .unwrap();
        assert!(token.is_type(TokenType::MethodSpec));

        lock!(fake.tables).fail_define_method_spec = true;
        assert!(define_method_spec(fake.as_ref(), Token::new(0x0A00_0001), &[0x0A, 0x01, 0x0E]).is_err());
    }
}
