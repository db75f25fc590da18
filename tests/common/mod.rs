//! An in-memory runtime for driving the agent end to end.
//!
//! [`Scope`] implements the four metadata interfaces of one module over plain vectors,
//! [`Runtime`] implements the runtime services over a set of loaded scopes and method bodies.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use dotweave::{
    metadata::{
        host::{
            AssemblyEmit, AssemblyImport, AssemblyMetadata, AssemblyProps, EnumHandle, HResult,
            HostResult, MemberRefProps, MetadataEmit, MetadataImport, MetadataInterfaces,
            MethodProps, MethodSpecProps, TypeRefProps,
        },
        token::{Token, TokenType},
    },
    profiler::{
        AppDomainId, AssemblyId, AssemblyInfo, EventMask, FunctionId, FunctionProps, ModuleFlags,
        ModuleId, ModuleInfo, ProfilerInfo,
    },
};
use widestring::{U16Str, U16String};

/// Wrapper assembly used by the fixtures.
pub const TRACING: &str =
    "Acme.Tracing, Version=1.0.0.0, Culture=neutral, PublicKeyToken=def86d061d0d2eeb";

/// `static void (int32, int32)`
pub const STATIC_TWO_INTS: [u8; 5] = [0x00, 0x02, 0x01, 0x08, 0x08];

/// One integration replacing `Acme.Data.Db::Query(int32, int32)` in any caller.
pub fn query_integration(caller: &str) -> String {
    format!(
        r#"[
          {{
            "name": "AcmeData",
            "method_replacements": [
              {{
                "caller": {caller},
                "target": {{
                  "assembly": "Acme.Data",
                  "type": "Acme.Data.Db",
                  "method": "Query",
                  "signature_types": ["System.Void", "System.Int32", "_"],
                  "minimum_major": 2,
                  "maximum_major": 2
                }},
                "wrapper": {{
                  "assembly": "{TRACING}",
                  "type": "Acme.Tracing.DbWrappers",
                  "method": "Query",
                  "signature": "00 04 01 08 08 08 08",
                  "action": "ReplaceTargetMethod"
                }}
              }}
            ]
          }}
        ]"#
    )
}

#[derive(Default)]
struct Tables {
    assembly: Option<AssemblyProps>,
    assembly_refs: Vec<AssemblyProps>,
    type_defs: Vec<String>,
    type_refs: Vec<(Token, String)>,
    methods: Vec<(Token, String, Vec<u8>)>,
    member_refs: Vec<(Token, String, Vec<u8>)>,
    method_specs: Vec<(Token, Vec<u8>)>,
}

/// Metadata of one module. Row `n` of a table is index `n - 1`.
#[derive(Default)]
pub struct Scope {
    tables: Mutex<Tables>,
}

fn not_found<T>() -> HostResult<T> {
    Err(HResult::CLDB_E_RECORD_NOTFOUND)
}

fn row_token(table: TokenType, index: usize) -> Token {
    Token::from_parts(table, u32::try_from(index + 1).unwrap())
}

fn all_rows<T>(rows: &[T], table: TokenType, keep: impl Fn(&T) -> bool) -> Vec<Token> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| keep(row))
        .map(|(index, _)| row_token(table, index))
        .collect()
}

fn serve(all: Vec<Token>, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>> {
    let start = handle.saturating_sub(1);
    let end = all.len().min(start + max);
    *handle = end + 1;
    Ok(all.get(start..end).map(<[Token]>::to_vec).unwrap_or_default())
}

fn row<T: Clone>(rows: &[T], token: Token, table: TokenType) -> HostResult<T> {
    if !token.is_type(table) || token.is_nil() {
        return not_found();
    }
    rows.get(token.row() as usize - 1)
        .cloned()
        .map_or_else(not_found, Ok)
}

/// Properties of an assembly named `name` at `version`.
pub fn assembly(name: &str, [major, minor, build, revision]: [u16; 4]) -> AssemblyProps {
    AssemblyProps {
        name: U16String::from_str(name),
        metadata: AssemblyMetadata {
            major,
            minor,
            build,
            revision,
            locale: U16String::new(),
        },
        public_key: Vec::new(),
        flags: 0,
    }
}

impl Scope {
    /// A scope of the assembly `name`.
    pub fn new(name: &str) -> Arc<Self> {
        let scope = Scope::default();
        scope.tables.lock().unwrap().assembly = Some(assembly(name, [1, 0, 0, 0]));
        Arc::new(scope)
    }

    pub fn interfaces(self: &Arc<Self>) -> MetadataInterfaces {
        MetadataInterfaces {
            import: self.clone(),
            emit: self.clone(),
            assembly_import: self.clone(),
            assembly_emit: self.clone(),
        }
    }

    pub fn add_assembly_ref(&self, name: &str, version: [u16; 4]) -> Token {
        let mut tables = self.tables.lock().unwrap();
        tables.assembly_refs.push(assembly(name, version));
        row_token(TokenType::AssemblyRef, tables.assembly_refs.len() - 1)
    }

    pub fn add_type_def(&self, name: &str) -> Token {
        let mut tables = self.tables.lock().unwrap();
        tables.type_defs.push(name.to_string());
        row_token(TokenType::TypeDef, tables.type_defs.len() - 1)
    }

    pub fn add_type_ref(&self, scope: Token, name: &str) -> Token {
        let mut tables = self.tables.lock().unwrap();
        tables.type_refs.push((scope, name.to_string()));
        row_token(TokenType::TypeRef, tables.type_refs.len() - 1)
    }

    pub fn add_method(&self, class: Token, name: &str, signature: &[u8]) -> Token {
        let mut tables = self.tables.lock().unwrap();
        tables
            .methods
            .push((class, name.to_string(), signature.to_vec()));
        row_token(TokenType::MethodDef, tables.methods.len() - 1)
    }

    pub fn add_member_ref(&self, parent: Token, name: &str, signature: &[u8]) -> Token {
        let mut tables = self.tables.lock().unwrap();
        tables
            .member_refs
            .push((parent, name.to_string(), signature.to_vec()));
        row_token(TokenType::MemberRef, tables.member_refs.len() - 1)
    }

    pub fn add_method_spec(&self, parent: Token, instantiation: &[u8]) -> Token {
        let mut tables = self.tables.lock().unwrap();
        tables.method_specs.push((parent, instantiation.to_vec()));
        row_token(TokenType::MethodSpec, tables.method_specs.len() - 1)
    }

    /// Names of the referenced assemblies, in row order.
    pub fn assembly_ref_names(&self) -> Vec<String> {
        self.tables
            .lock()
            .unwrap()
            .assembly_refs
            .iter()
            .map(|props| props.name.to_string_lossy())
            .collect()
    }

    /// The most recent member reference named `name` with its parent and signature.
    pub fn member_ref(&self, name: &str) -> Option<(Token, Token, Vec<u8>)> {
        let tables = self.tables.lock().unwrap();
        tables
            .member_refs
            .iter()
            .enumerate()
            .rev()
            .find(|(_, (_, row_name, _))| row_name == name)
            .map(|(index, (parent, _, signature))| {
                (row_token(TokenType::MemberRef, index), *parent, signature.clone())
            })
    }

    pub fn member_ref_count(&self) -> usize {
        self.tables.lock().unwrap().member_refs.len()
    }

    /// Parent and instantiation of a `MethodSpec` row.
    pub fn method_spec(&self, token: Token) -> Option<(Token, Vec<u8>)> {
        row(&self.tables.lock().unwrap().method_specs, token, TokenType::MethodSpec).ok()
    }
}

impl MetadataImport for Scope {
    fn enum_type_defs(&self, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>> {
        let all = all_rows(&self.tables.lock().unwrap().type_defs, TokenType::TypeDef, |_| true);
        serve(all, handle, max)
    }

    fn enum_type_refs(&self, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>> {
        let all = all_rows(&self.tables.lock().unwrap().type_refs, TokenType::TypeRef, |_| true);
        serve(all, handle, max)
    }

    fn enum_methods(
        &self,
        handle: &mut EnumHandle,
        parent: Token,
        max: usize,
    ) -> HostResult<Vec<Token>> {
        let all = all_rows(
            &self.tables.lock().unwrap().methods,
            TokenType::MethodDef,
            |row| row.0 == parent,
        );
        serve(all, handle, max)
    }

    fn enum_member_refs(
        &self,
        handle: &mut EnumHandle,
        parent: Token,
        max: usize,
    ) -> HostResult<Vec<Token>> {
        let all = all_rows(
            &self.tables.lock().unwrap().member_refs,
            TokenType::MemberRef,
            |row| row.0 == parent,
        );
        serve(all, handle, max)
    }

    fn enum_module_refs(&self, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>> {
        serve(Vec::new(), handle, max)
    }

    fn close_enum(&self, _handle: EnumHandle) {}

    fn get_module_from_scope(&self) -> HostResult<Token> {
        Ok(Token::from_parts(TokenType::Module, 1))
    }

    fn get_type_def_props(&self, token: Token) -> HostResult<U16String> {
        row(&self.tables.lock().unwrap().type_defs, token, TokenType::TypeDef)
            .map(|name| U16String::from_str(&name))
    }

    fn get_type_ref_props(&self, token: Token) -> HostResult<TypeRefProps> {
        row(&self.tables.lock().unwrap().type_refs, token, TokenType::TypeRef).map(
            |(resolution_scope, name)| TypeRefProps {
                resolution_scope,
                name: U16String::from_str(&name),
            },
        )
    }

    fn get_module_ref_props(&self, _token: Token) -> HostResult<U16String> {
        not_found()
    }

    fn get_type_spec_from_token(&self, _token: Token) -> HostResult<Vec<u8>> {
        not_found()
    }

    fn get_method_props(&self, token: Token) -> HostResult<MethodProps> {
        row(&self.tables.lock().unwrap().methods, token, TokenType::MethodDef).map(
            |(class, name, signature)| MethodProps {
                class,
                name: U16String::from_str(&name),
                signature,
            },
        )
    }

    fn get_member_ref_props(&self, token: Token) -> HostResult<MemberRefProps> {
        row(&self.tables.lock().unwrap().member_refs, token, TokenType::MemberRef).map(
            |(parent, name, signature)| MemberRefProps {
                parent,
                name: U16String::from_str(&name),
                signature,
            },
        )
    }

    fn get_method_spec_props(&self, token: Token) -> HostResult<MethodSpecProps> {
        row(&self.tables.lock().unwrap().method_specs, token, TokenType::MethodSpec)
            .map(|(parent, signature)| MethodSpecProps { parent, signature })
    }

    fn get_sig_from_token(&self, _token: Token) -> HostResult<Vec<u8>> {
        not_found()
    }

    fn find_type_ref(&self, scope: Token, name: &U16Str) -> HostResult<Token> {
        let name = name.to_string_lossy();
        let tables = self.tables.lock().unwrap();
        tables
            .type_refs
            .iter()
            .position(|(row_scope, row_name)| *row_scope == scope && *row_name == name)
            .map(|index| row_token(TokenType::TypeRef, index))
            .map_or_else(not_found, Ok)
    }

    fn find_type_def_by_name(&self, name: &U16Str) -> HostResult<Token> {
        let name = name.to_string_lossy();
        let tables = self.tables.lock().unwrap();
        tables
            .type_defs
            .iter()
            .position(|row_name| *row_name == name)
            .map(|index| row_token(TokenType::TypeDef, index))
            .map_or_else(not_found, Ok)
    }

    fn find_member_ref(
        &self,
        parent: Token,
        name: &U16Str,
        signature: &[u8],
    ) -> HostResult<Token> {
        let name = name.to_string_lossy();
        let tables = self.tables.lock().unwrap();
        tables
            .member_refs
            .iter()
            .position(|(row_parent, row_name, row_signature)| {
                *row_parent == parent && *row_name == name && row_signature == signature
            })
            .map(|index| row_token(TokenType::MemberRef, index))
            .map_or_else(not_found, Ok)
    }
}

impl AssemblyImport for Scope {
    fn get_assembly_from_scope(&self) -> HostResult<Token> {
        Ok(Token::from_parts(TokenType::Assembly, 1))
    }

    fn get_assembly_props(&self, _token: Token) -> HostResult<AssemblyProps> {
        self.tables
            .lock()
            .unwrap()
            .assembly
            .clone()
            .map_or_else(not_found, Ok)
    }

    fn enum_assembly_refs(&self, handle: &mut EnumHandle, max: usize) -> HostResult<Vec<Token>> {
        let all = all_rows(
            &self.tables.lock().unwrap().assembly_refs,
            TokenType::AssemblyRef,
            |_| true,
        );
        serve(all, handle, max)
    }

    fn get_assembly_ref_props(&self, token: Token) -> HostResult<AssemblyProps> {
        row(&self.tables.lock().unwrap().assembly_refs, token, TokenType::AssemblyRef)
    }

    fn close_enum(&self, _handle: EnumHandle) {}
}

impl MetadataEmit for Scope {
    fn define_type_ref_by_name(&self, scope: Token, name: &U16Str) -> HostResult<Token> {
        Ok(self.add_type_ref(scope, &name.to_string_lossy()))
    }

    fn define_member_ref(
        &self,
        parent: Token,
        name: &U16Str,
        signature: &[u8],
    ) -> HostResult<Token> {
        Ok(self.add_member_ref(parent, &name.to_string_lossy(), signature))
    }

    fn define_method_spec(&self, parent: Token, instantiation: &[u8]) -> HostResult<Token> {
        Ok(self.add_method_spec(parent, instantiation))
    }
}

impl AssemblyEmit for Scope {
    fn define_assembly_ref(&self, props: &AssemblyProps) -> HostResult<Token> {
        let mut tables = self.tables.lock().unwrap();
        tables.assembly_refs.push(props.clone());
        Ok(row_token(TokenType::AssemblyRef, tables.assembly_refs.len() - 1))
    }
}

struct LoadedModule {
    info: ModuleInfo,
    assembly: AssemblyInfo,
    scope: Arc<Scope>,
}

/// Runtime services over a set of loaded modules.
#[derive(Default)]
pub struct Runtime {
    modules: Mutex<HashMap<ModuleId, LoadedModule>>,
    functions: Mutex<HashMap<FunctionId, FunctionProps>>,
    bodies: Mutex<HashMap<(ModuleId, Token), Vec<u8>>>,
    rewritten: Mutex<Vec<(ModuleId, Token)>>,
    event_mask: Mutex<Option<EventMask>>,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Runtime::default())
    }

    /// Register `scope` as module `module_id` of an assembly loaded into `domain`.
    pub fn load(&self, module_id: ModuleId, domain: AppDomainId, scope: &Arc<Scope>) {
        self.load_with_flags(module_id, domain, scope, ModuleFlags::DISK);
    }

    pub fn load_with_flags(
        &self,
        module_id: ModuleId,
        domain: AppDomainId,
        scope: &Arc<Scope>,
        flags: ModuleFlags,
    ) {
        let name = scope
            .get_assembly_props(Token::from_parts(TokenType::Assembly, 1))
            .map(|props| props.name)
            .unwrap_or_default();
        let assembly_id: AssemblyId = module_id + 1000;

        self.modules.lock().unwrap().insert(
            module_id,
            LoadedModule {
                info: ModuleInfo {
                    path: name.clone(),
                    assembly_id,
                    flags,
                },
                assembly: AssemblyInfo {
                    name,
                    app_domain_id: domain,
                    module_id,
                },
                scope: scope.clone(),
            },
        );
    }

    /// Register method `token` of `module_id` as function `function_id` with `body`.
    pub fn define_function(
        &self,
        function_id: FunctionId,
        module_id: ModuleId,
        token: Token,
        body: Vec<u8>,
    ) {
        self.functions.lock().unwrap().insert(
            function_id,
            FunctionProps {
                class_id: 0,
                module_id,
                token,
            },
        );
        self.bodies.lock().unwrap().insert((module_id, token), body);
    }

    /// Current body of method `token` in `module_id`.
    pub fn body(&self, module_id: ModuleId, token: Token) -> Vec<u8> {
        self.bodies
            .lock()
            .unwrap()
            .get(&(module_id, token))
            .cloned()
            .unwrap_or_default()
    }

    /// Methods whose body was replaced, in order.
    pub fn rewritten(&self) -> Vec<(ModuleId, Token)> {
        self.rewritten.lock().unwrap().clone()
    }

    pub fn event_mask(&self) -> Option<EventMask> {
        *self.event_mask.lock().unwrap()
    }
}

impl ProfilerInfo for Runtime {
    fn get_module_info(&self, module: ModuleId) -> HostResult<ModuleInfo> {
        self.modules
            .lock()
            .unwrap()
            .get(&module)
            .map(|loaded| loaded.info.clone())
            .ok_or(HResult::E_INVALIDARG)
    }

    fn get_assembly_info(&self, assembly: AssemblyId) -> HostResult<AssemblyInfo> {
        self.modules
            .lock()
            .unwrap()
            .values()
            .find(|loaded| loaded.info.assembly_id == assembly)
            .map(|loaded| loaded.assembly.clone())
            .ok_or(HResult::E_INVALIDARG)
    }

    fn get_function_info(&self, function: FunctionId) -> HostResult<FunctionProps> {
        self.functions
            .lock()
            .unwrap()
            .get(&function)
            .copied()
            .ok_or(HResult::E_INVALIDARG)
    }

    fn get_module_metadata(&self, module: ModuleId) -> HostResult<MetadataInterfaces> {
        self.modules
            .lock()
            .unwrap()
            .get(&module)
            .map(|loaded| loaded.scope.interfaces())
            .ok_or(HResult::E_INVALIDARG)
    }

    fn get_il_function_body(&self, module: ModuleId, method: Token) -> HostResult<Vec<u8>> {
        self.bodies
            .lock()
            .unwrap()
            .get(&(module, method))
            .cloned()
            .ok_or(HResult::E_INVALIDARG)
    }

    fn set_il_function_body(&self, module: ModuleId, method: Token, body: &[u8]) -> HostResult<()> {
        self.bodies
            .lock()
            .unwrap()
            .insert((module, method), body.to_vec());
        self.rewritten.lock().unwrap().push((module, method));
        Ok(())
    }

    fn set_event_mask(&self, mask: EventMask) -> HostResult<()> {
        *self.event_mask.lock().unwrap() = Some(mask);
        Ok(())
    }
}

/// Tokens of the application module built by [`application`].
pub struct Application {
    pub scope: Arc<Scope>,
    pub query: Token,
    pub main: Token,
    pub helper: Token,
}

/// `ldc.i4.1; ldc.i4.2; call <target>; ret` with a tiny header.
pub fn calling_body(target: Token) -> Vec<u8> {
    let mut body = vec![0x22, 0x17, 0x18, 0x28];
    body.extend_from_slice(&target.value().to_le_bytes());
    body.push(0x2A);
    body
}

/// `MyApp` referencing `Acme.Data` at `data_version`, with `MyApp.Program::Main` and
/// `MyApp.Program::Helper` both calling `Acme.Data.Db::Query`.
pub fn application(data_version: [u16; 4]) -> Application {
    let scope = Scope::new("MyApp");
    let data = scope.add_assembly_ref("Acme.Data", data_version);
    let db = scope.add_type_ref(data, "Acme.Data.Db");
    let query = scope.add_member_ref(db, "Query", &STATIC_TWO_INTS);

    let program = scope.add_type_def("MyApp.Program");
    let main = scope.add_method(program, "Main", &[0x00, 0x00, 0x01]);
    let helper = scope.add_method(program, "Helper", &[0x00, 0x00, 0x01]);

    Application {
        scope,
        query,
        main,
        helper,
    }
}
