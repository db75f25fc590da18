//! The instrumentation agent: reacts to runtime notifications by preparing modules and
//! rewriting methods.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use log::{debug, info, warn, LevelFilter};

use crate::{
    assembly::ILRewriter,
    cache::{ModuleMetadataCache, ModuleRecord},
    config::{current_process_name, Config},
    integration::{
        filter_by_caller, filter_by_name, filter_by_target, flatten_integrations, load_integrations,
        Integration,
    },
    metadata::{emitter::MetadataBuilder, host::HResult, resolver::TokenResolver},
    profiler::{
        boundary::ProfilerCallback,
        info::{module_assembly, EventMask, ProfilerInfo},
        replace::replace_call_sites,
        AppDomainId, AssemblyId, FunctionId, ModuleId,
    },
    Error, Result,
};

/// Assemblies that are never instrumented.
///
/// Core libraries must not receive new assembly references; the others are known to be
/// loaded by instrumentation itself or to never contain interesting call sites.
pub const SKIPPED_ASSEMBLIES: &[&str] = &[
    "mscorlib",
    "netstandard",
    "System.Private.CoreLib",
    "MsgPack",
    "Sigil",
    "Sigil.Emit.DynamicAssembly",
    "System.Core",
    "System.Runtime",
    "System.IO.FileSystem",
    "System.Collections",
    "System.Runtime.Extensions",
    "System.Threading.Tasks",
    "System.Runtime.InteropServices",
    "System.Runtime.InteropServices.RuntimeInformation",
    "System.ComponentModel",
    "System.Console",
    "System.Diagnostics.DiagnosticSource",
    "Microsoft.Extensions.Options",
    "Microsoft.Extensions.ObjectPool",
    "System.Configuration",
    "System.Xml.Linq",
    "Microsoft.AspNetCore.Razor.Language",
    "Microsoft.AspNetCore.Mvc.RazorPages",
    "Microsoft.CSharp",
    "Newtonsoft.Json",
    "Anonymously Hosted DynamicMethods Assembly",
    "ISymWrapper",
];

const CORE_LIBRARY: &str = "mscorlib";

/// Domains of the core library and of the wrapper assemblies, as far as they loaded.
#[derive(Debug, Default)]
struct DomainState {
    core_library: Option<AppDomainId>,
    wrappers: Option<AppDomainId>,
}

impl DomainState {
    /// Record the load of `assembly` into `domain`. Returns false if a module of this domain
    /// must not be instrumented.
    ///
    /// Modules shared by all domains live in the core library's domain. Instrumenting them is
    /// only safe if the wrappers are shared too.
    fn admit(&mut self, assembly: &str, domain: AppDomainId, is_wrapper: bool) -> bool {
        if assembly == CORE_LIBRARY && self.core_library.is_none() {
            self.core_library = Some(domain);
            return false;
        }
        if is_wrapper {
            self.wrappers = Some(domain);
        }

        match (self.core_library, self.wrappers) {
            (Some(shared), Some(wrappers)) => domain != shared || shared == wrappers,
            _ => true,
        }
    }
}

/// The call-site instrumentation agent.
///
/// One instance serves the whole process. All notification handlers take `&self` and may run
/// concurrently; per-module state lives in the [`ModuleMetadataCache`].
pub struct Profiler {
    config: Config,
    process_name: String,
    preloaded: Option<Vec<Integration>>,
    info: OnceLock<Arc<dyn ProfilerInfo>>,
    integrations: OnceLock<Vec<Integration>>,
    wrapper_assemblies: OnceLock<HashSet<String>>,
    modules: ModuleMetadataCache,
    domains: Mutex<DomainState>,
    attached: AtomicBool,
}

impl Profiler {
    /// Create an agent that loads its integrations from the configured files on initialization.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Profiler {
            config,
            process_name: current_process_name(),
            preloaded: None,
            info: OnceLock::new(),
            integrations: OnceLock::new(),
            wrapper_assemblies: OnceLock::new(),
            modules: ModuleMetadataCache::new(),
            domains: Mutex::new(DomainState::default()),
            attached: AtomicBool::new(false),
        }
    }

    /// Create an agent using `integrations` instead of the configured files.
    #[must_use]
    pub fn with_integrations(config: Config, integrations: Vec<Integration>) -> Self {
        Profiler {
            preloaded: Some(integrations),
            ..Profiler::new(config)
        }
    }

    /// Override the process name checked against the include and exclude lists.
    #[must_use]
    pub fn with_process_name(mut self, process_name: impl Into<String>) -> Self {
        self.process_name = process_name.into();
        self
    }

    /// The configuration this agent was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true between a successful initialization and shutdown.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// The enabled integrations; empty before initialization.
    #[must_use]
    pub fn integrations(&self) -> &[Integration] {
        self.integrations.get().map_or(&[], Vec::as_slice)
    }

    /// Per-module instrumentation state.
    #[must_use]
    pub fn modules(&self) -> &ModuleMetadataCache {
        &self.modules
    }

    /// Notifications and runtime behaviour requested from the runtime.
    #[must_use]
    pub fn event_mask(&self) -> EventMask {
        let mut mask = EventMask::MONITOR_JIT_COMPILATION
            | EventMask::MONITOR_MODULE_LOADS
            | EventMask::MONITOR_ASSEMBLY_LOADS
            | EventMask::DISABLE_INLINING
            | EventMask::DISABLE_TRANSPARENCY_CHECKS_UNDER_FULL_TRUST
            | EventMask::DISABLE_ALL_NGEN_IMAGES;
        if self.config.disable_optimizations {
            mask |= EventMask::DISABLE_OPTIMIZATIONS;
        }
        mask
    }

    fn info(&self) -> Option<&Arc<dyn ProfilerInfo>> {
        if self.is_attached() {
            self.info.get()
        } else {
            None
        }
    }

    fn attach(&self, info: Arc<dyn ProfilerInfo>) -> Result<()> {
        log::set_max_level(if self.config.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });

        if !self.config.enabled {
            return Err(Error::AttachFailed("agent is disabled".to_string()));
        }
        if !self.config.should_attach(&self.process_name) {
            return Err(Error::AttachFailed(format!(
                "process {} is not instrumented",
                self.process_name
            )));
        }
        if self.info.get().is_some() {
            return Err(Error::AttachFailed("agent already initialized".to_string()));
        }

        let all = match &self.preloaded {
            Some(integrations) => integrations.clone(),
            None if self.config.integration_paths.is_empty() => {
                return Err(Error::Config("no integration files configured".to_string()));
            }
            None => load_integrations(&self.config.integration_paths),
        };

        let integrations = filter_by_name(&all, &self.config.disabled_integrations);
        if integrations.is_empty() {
            return Err(Error::AttachFailed("no integrations enabled".to_string()));
        }

        info.set_event_mask(self.event_mask())
            .map_err(|hresult| host_error!("SetEventMask", hresult))?;

        let wrappers = integrations
            .iter()
            .flat_map(|integration| &integration.method_replacements)
            .map(|replacement| replacement.wrapper.assembly.name.clone())
            .collect();

        info!(
            "Attaching to {} with {} integrations",
            self.process_name,
            integrations.len()
        );

        // initialization runs once, the cells are empty here
        let _ = self.integrations.set(integrations);
        let _ = self.wrapper_assemblies.set(wrappers);
        let _ = self.info.set(info);
        self.attached.store(true, Ordering::Release);
        Ok(())
    }

    fn is_wrapper_assembly(&self, name: &str) -> bool {
        self.wrapper_assemblies
            .get()
            .is_some_and(|wrappers| wrappers.contains(name))
    }

    /// Prepare `module_id` for instrumentation. Returns true if a record was stored.
    fn load_module(&self, info: &dyn ProfilerInfo, module_id: ModuleId) -> Result<bool> {
        let (module, assembly) = module_assembly(info, module_id)?;
        let assembly_name = assembly.name.to_string_lossy();
        let is_wrapper = self.is_wrapper_assembly(&assembly_name);

        if !try_lock!(self.domains)?.admit(&assembly_name, assembly.app_domain_id, is_wrapper) {
            debug!(
                "Skipping module {} {}: shared by all domains, wrappers are not",
                module_id, assembly_name
            );
            return Ok(false);
        }

        if module.is_windows_runtime() {
            debug!("Skipping Windows Runtime module {} {}", module_id, assembly_name);
            return Ok(false);
        }

        if is_wrapper || SKIPPED_ASSEMBLIES.contains(&assembly_name.as_str()) {
            debug!("Skipping known module {} {}", module_id, assembly_name);
            return Ok(false);
        }

        let methods = filter_by_caller(&flatten_integrations(self.integrations()), &assembly_name);
        if methods.is_empty() {
            debug!("Skipping module {} {}: filtered by caller", module_id, assembly_name);
            return Ok(false);
        }

        let metadata = info
            .get_module_metadata(module_id)
            .map_err(|hresult| host_error!("GetModuleMetaData", hresult))?;

        let methods = filter_by_target(&methods, metadata.assembly_import.as_ref());
        if methods.is_empty() {
            debug!("Skipping module {} {}: filtered by target", module_id, assembly_name);
            return Ok(false);
        }

        let module_token = metadata
            .import
            .get_module_from_scope()
            .map_err(|hresult| host_error!("GetModuleFromScope", hresult))?;

        let mut record = ModuleRecord::new(
            module_id,
            assembly_name.clone(),
            metadata,
            module_token,
            methods.clone(),
        );

        let mut builder = MetadataBuilder::new(&mut record);
        for method in &methods {
            let wrapper = &method.replacement.wrapper;
            builder.emit_assembly_ref(&wrapper.assembly)?;
            builder.store_wrapper_method_ref(wrapper)?;
        }

        info!(
            "Emitted {} wrapper references into module {} {} (domain {})",
            record.wrapper_ref_count(),
            module_id,
            assembly_name,
            assembly.app_domain_id
        );
        self.modules.upsert(module_id, record);
        Ok(true)
    }

    /// Rewrite `function_id` if its module is instrumented. Returns the number of replaced
    /// call sites.
    fn compile(&self, info: &dyn ProfilerInfo, function_id: FunctionId) -> Result<usize> {
        let function = info
            .get_function_info(function_id)
            .map_err(|hresult| host_error!("GetFunctionInfo", hresult))?;

        let Some(record) = self.modules.lookup(function.module_id) else {
            return Ok(0);
        };
        let record = try_lock!(record)?;
        if record.is_released() {
            return Ok(0);
        }

        let caller = TokenResolver::new(record.metadata.import.as_ref()).function_info(function.token);
        if !caller.is_valid() {
            return Ok(0);
        }

        let replacements =
            record.method_replacements_for_caller(&caller.type_info.name, &caller.name);
        if replacements.is_empty() {
            return Ok(0);
        }
        debug!(
            "Compiling {}.{} in {} with {} candidate rules",
            caller.type_info.name,
            caller.name,
            record.assembly_name,
            replacements.len()
        );

        let body = info
            .get_il_function_body(function.module_id, function.token)
            .map_err(|hresult| host_error!("GetILFunctionBody", hresult))?;

        let mut rewriter = ILRewriter::new();
        rewriter.import(&body)?;

        let replaced = replace_call_sites(&mut rewriter, &record, &replacements)?;
        if replaced > 0 {
            let body = rewriter.export()?;
            info.set_il_function_body(function.module_id, function.token, &body)
                .map_err(|hresult| host_error!("SetILFunctionBody", hresult))?;
        }
        Ok(replaced)
    }
}

impl ProfilerCallback for Profiler {
    fn initialize(&self, info: Arc<dyn ProfilerInfo>) -> HResult {
        match self.attach(info) {
            Ok(()) => HResult::S_OK,
            Err(error) => {
                info!("Not attaching: {}", error);
                HResult::E_FAIL
            }
        }
    }

    fn shutdown(&self) -> HResult {
        self.attached.store(false, Ordering::Release);
        self.modules.clear();
        info!("Shut down");
        HResult::S_OK
    }

    fn assembly_load_finished(&self, assembly_id: AssemblyId, status: HResult) -> HResult {
        if status.succeeded() && self.is_attached() {
            debug!("Assembly {} loaded", assembly_id);
        }
        HResult::S_OK
    }

    fn module_load_finished(&self, module_id: ModuleId, status: HResult) -> HResult {
        if status.failed() {
            return HResult::S_OK;
        }
        let Some(info) = self.info() else {
            return HResult::S_OK;
        };

        if let Err(error) = self.load_module(info.as_ref(), module_id) {
            warn!("Module {} left uninstrumented: {}", module_id, error);
        }
        HResult::S_OK
    }

    fn module_unload_started(&self, module_id: ModuleId) -> HResult {
        if self.modules.erase(module_id) {
            debug!("Released module {}", module_id);
        }
        HResult::S_OK
    }

    fn jit_compilation_started(&self, function_id: FunctionId, is_safe_to_block: bool) -> HResult {
        if !is_safe_to_block {
            return HResult::S_OK;
        }
        let Some(info) = self.info() else {
            return HResult::S_OK;
        };

        if let Err(error) = self.compile(info.as_ref(), function_id) {
            warn!("Function {} left unmodified: {}", function_id, error);
        }
        HResult::S_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_domain_requires_shared_wrappers() {
        let mut domains = DomainState::default();
        assert!(!domains.admit("mscorlib", 1, false));
        assert!(domains.admit("System.Data", 1, false));

        // wrappers loaded into an application domain
        assert!(domains.admit("Acme.Tracing", 2, true));
        assert!(!domains.admit("System.Data", 1, false));
        assert!(domains.admit("MyApp", 2, false));

        // wrappers shared as well
        assert!(domains.admit("Acme.Tracing", 1, true));
        assert!(domains.admit("System.Data", 1, false));
    }

    #[test]
    fn event_mask_follows_config() {
        let profiler = Profiler::new(Config::default());
        assert!(!profiler.event_mask().contains(EventMask::DISABLE_OPTIMIZATIONS));
        assert_eq!(profiler.event_mask().bits(), 0x9000_202C);

        let profiler = Profiler::new(Config {
            disable_optimizations: true,
            ..Config::default()
        });
        assert!(profiler.event_mask().contains(EventMask::DISABLE_OPTIMIZATIONS));
    }

    #[test]
    fn not_attached_before_initialize() {
        let profiler = Profiler::new(Config::default());
        assert!(!profiler.is_attached());
        assert!(profiler.integrations().is_empty());
        assert_eq!(profiler.module_load_finished(1, HResult::S_OK), HResult::S_OK);
        assert_eq!(profiler.jit_compilation_started(1, true), HResult::S_OK);
        assert!(profiler.modules().is_empty());
    }
}
