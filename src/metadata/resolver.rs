//! Token resolution into descriptors.
//!
//! [`TokenResolver`] turns the raw tokens found in instruction operands into
//! [`FunctionInfo`] and [`TypeInfo`] descriptors, carrying the names and signatures that
//! integration rules are matched against. Resolution never fails loudly: a token that cannot
//! be resolved yields a descriptor whose `is_valid()` is false.
//!
//! # Examples
//!
//! ```rust,ignore
//! let resolver = TokenResolver::new(metadata.import.as_ref());
//! let target = resolver.function_info(operand_token);
//! if target.is_valid() && target.name == "ExecuteReader" {
//!     let types = resolver.signature_types(&target);
//! }
//! ```

use crate::{
    file::parser::Parser,
    metadata::{
        enumerator::TokenEnumerator,
        host::{AssemblyImport, AssemblyProps, MetadataImport},
        signatures::{MethodSignature, SignatureParser, ELEMENT_TYPE},
        token::{Token, TokenType},
    },
};

/// Nesting limit for type resolution through type specs and method parents.
const MAX_RESOLVE_DEPTH: usize = 8;

/// A resolved type reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeInfo {
    /// The token this descriptor was resolved from
    pub id: Token,
    /// Fully qualified name; for generic instantiations the name of the generic definition
    pub name: String,
}

impl TypeInfo {
    /// Returns true if the type was resolved.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.id.is_null()
    }
}

/// A resolved method reference, definition or instantiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionInfo {
    /// The token this descriptor was resolved from
    pub id: Token,
    /// Method name
    pub name: String,
    /// Declaring type
    pub type_info: TypeInfo,
    /// Method signature; for instantiations, the signature of the generic definition
    pub signature: MethodSignature,
    /// True if `id` is a `MethodSpec`
    pub is_generic: bool,
    /// For instantiations, the instantiated `MethodDef` or `MemberRef`; otherwise `id`
    pub method_def_id: Token,
    /// For instantiations, the instantiation blob; otherwise empty
    pub method_spec_signature: MethodSignature,
}

impl FunctionInfo {
    /// Returns true if the function was resolved.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.id.is_null()
    }
}

/// Resolves tokens against the metadata of one module.
pub struct TokenResolver<'a> {
    import: &'a dyn MetadataImport,
}

impl<'a> TokenResolver<'a> {
    /// Create a resolver over `import`.
    #[must_use]
    pub fn new(import: &'a dyn MetadataImport) -> Self {
        TokenResolver { import }
    }

    /// Resolve a `TypeDef`, `TypeRef`, `TypeSpec`, `ModuleRef`, `MethodDef` or `MemberRef`
    /// token to its type.
    ///
    /// Method tokens resolve to their declaring type, generic instantiations to their generic
    /// definition. Any other token yields an invalid descriptor.
    #[must_use]
    pub fn type_info(&self, token: Token) -> TypeInfo {
        self.type_info_at(token, 0)
    }

    fn type_info_at(&self, token: Token, depth: usize) -> TypeInfo {
        if depth > MAX_RESOLVE_DEPTH {
            return TypeInfo::default();
        }

        let name = match token.token_type() {
            Some(TokenType::TypeDef) => self.import.get_type_def_props(token).ok(),
            Some(TokenType::TypeRef) => self
                .import
                .get_type_ref_props(token)
                .ok()
                .map(|props| props.name),
            Some(TokenType::ModuleRef) => self.import.get_module_ref_props(token).ok(),
            Some(TokenType::TypeSpec) => {
                let generic = self.generic_definition(token, depth);
                return TypeInfo {
                    id: if generic.is_valid() {
                        token
                    } else {
                        Token::default()
                    },
                    name: generic.name,
                };
            }
            Some(TokenType::MethodDef | TokenType::MemberRef) => {
                return self.function_info_at(token, depth + 1).type_info;
            }
            _ => None,
        };

        match name {
            Some(name) => TypeInfo {
                id: token,
                name: name.to_string_lossy(),
            },
            None => TypeInfo::default(),
        }
    }

    /// Resolve the generic type definition of a `GENERICINST` type spec.
    fn generic_definition(&self, token: Token, depth: usize) -> TypeInfo {
        let Ok(blob) = self.import.get_type_spec_from_token(token) else {
            return TypeInfo::default();
        };

        match blob.as_slice() {
            [ELEMENT_TYPE::GENERICINST, kind, rest @ ..]
                if *kind == ELEMENT_TYPE::CLASS || *kind == ELEMENT_TYPE::VALUETYPE =>
            {
                let mut parser = Parser::new(rest);
                match parser.read_compressed_token() {
                    Ok(definition) => self.type_info_at(definition, depth + 1),
                    Err(_) => TypeInfo::default(),
                }
            }
            _ => TypeInfo::default(),
        }
    }

    /// Resolve a `MethodDef`, `MemberRef` or `MethodSpec` token.
    ///
    /// A `MethodSpec` resolves to the descriptor of its generic definition with `id`,
    /// `is_generic`, `method_def_id` and `method_spec_signature` describing the
    /// instantiation. Any other token yields an invalid descriptor.
    #[must_use]
    pub fn function_info(&self, token: Token) -> FunctionInfo {
        self.function_info_at(token, 0)
    }

    fn function_info_at(&self, token: Token, depth: usize) -> FunctionInfo {
        if depth > MAX_RESOLVE_DEPTH {
            return FunctionInfo::default();
        }

        let (parent, name, signature) = match token.token_type() {
            Some(TokenType::MethodDef) => match self.import.get_method_props(token) {
                Ok(props) => (props.class, props.name, props.signature),
                Err(_) => return FunctionInfo::default(),
            },
            Some(TokenType::MemberRef) => match self.import.get_member_ref_props(token) {
                Ok(props) => (props.parent, props.name, props.signature),
                Err(_) => return FunctionInfo::default(),
            },
            Some(TokenType::MethodSpec) => {
                let Ok(spec) = self.import.get_method_spec_props(token) else {
                    return FunctionInfo::default();
                };
                let generic = self.function_info_at(spec.parent, depth + 1);
                if !generic.is_valid() {
                    return FunctionInfo::default();
                }

                return FunctionInfo {
                    id: token,
                    is_generic: true,
                    method_def_id: spec.parent,
                    method_spec_signature: MethodSignature::new(spec.signature),
                    ..generic
                };
            }
            _ => return FunctionInfo::default(),
        };

        FunctionInfo {
            id: token,
            name: name.to_string_lossy(),
            type_info: self.type_info_at(parent, depth + 1),
            signature: MethodSignature::new(signature),
            is_generic: false,
            method_def_id: token,
            method_spec_signature: MethodSignature::default(),
        }
    }

    /// Type names of the return type followed by every parameter of `function`.
    ///
    /// Returns `None` if the signature cannot be parsed or names a type that does not resolve.
    #[must_use]
    pub fn signature_types(&self, function: &FunctionInfo) -> Option<Vec<String>> {
        let lookup = |token: Token| {
            let info = self.type_info(token);
            info.is_valid().then_some(info.name)
        };

        match SignatureParser::new(function.signature.data(), lookup).parse_method_types() {
            Ok((_, types)) => Some(types),
            Err(error) => {
                log::debug!(
                    "Could not parse signature of {}.{}: {}",
                    function.type_info.name,
                    function.name,
                    error
                );
                None
            }
        }
    }

    /// All `TypeDef` tokens of the module.
    pub fn enum_type_defs(&self) -> TokenEnumerator<'a> {
        let import = self.import;
        TokenEnumerator::new(
            move |handle, max| import.enum_type_defs(handle, max),
            move |handle| import.close_enum(handle),
        )
    }

    /// All `TypeRef` tokens of the module.
    pub fn enum_type_refs(&self) -> TokenEnumerator<'a> {
        let import = self.import;
        TokenEnumerator::new(
            move |handle, max| import.enum_type_refs(handle, max),
            move |handle| import.close_enum(handle),
        )
    }

    /// The `MethodDef` tokens declared by `parent`.
    pub fn enum_methods(&self, parent: Token) -> TokenEnumerator<'a> {
        let import = self.import;
        TokenEnumerator::new(
            move |handle, max| import.enum_methods(handle, parent, max),
            move |handle| import.close_enum(handle),
        )
    }

    /// The `MemberRef` tokens whose parent is `parent`.
    pub fn enum_member_refs(&self, parent: Token) -> TokenEnumerator<'a> {
        let import = self.import;
        TokenEnumerator::new(
            move |handle, max| import.enum_member_refs(handle, parent, max),
            move |handle| import.close_enum(handle),
        )
    }

    /// All `ModuleRef` tokens of the module.
    pub fn enum_module_refs(&self) -> TokenEnumerator<'a> {
        let import = self.import;
        TokenEnumerator::new(
            move |handle, max| import.enum_module_refs(handle, max),
            move |handle| import.close_enum(handle),
        )
    }

    /// Find a method by declaring type name and method name.
    #[must_use]
    pub fn find_method(&self, type_name: &str, method_name: &str) -> Option<Token> {
        self.enum_type_defs()
            .find(|&type_def| self.type_info(type_def).name == type_name)
            .and_then(|type_def| {
                self.enum_methods(type_def)
                    .find(|&method| self.function_info(method).name == method_name)
            })
    }
}

/// All `AssemblyRef` tokens of a module.
pub fn enum_assembly_refs(import: &dyn AssemblyImport) -> TokenEnumerator<'_> {
    TokenEnumerator::new(
        move |handle, max| import.enum_assembly_refs(handle, max),
        move |handle| import.close_enum(handle),
    )
}

/// Simple name of the module's own assembly, if it has a manifest.
#[must_use]
pub fn assembly_name(import: &dyn AssemblyImport) -> Option<String> {
    let token = import.get_assembly_from_scope().ok()?;
    let props = import.get_assembly_props(token).ok()?;
    Some(props.name.to_string_lossy())
}

/// Token and properties of every assembly reference of a module.
pub fn assembly_refs(import: &dyn AssemblyImport) -> Vec<(Token, AssemblyProps)> {
    enum_assembly_refs(import)
        .filter_map(|token| {
            import
                .get_assembly_ref_props(token)
                .ok()
                .map(|props| (token, props))
        })
        .collect()
}

/// Find the assembly reference named `name`.
#[must_use]
pub fn find_assembly_ref(import: &dyn AssemblyImport, name: &str) -> Option<Token> {
    enum_assembly_refs(import).find(|&token| {
        import
            .get_assembly_ref_props(token)
            .is_ok_and(|props| props.name.to_string_lossy() == name)
    })
}
