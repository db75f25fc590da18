//! Runtime services available to the agent once it is initialized.

use bitflags::bitflags;
use widestring::U16String;

use crate::{
    metadata::{
        host::{HostResult, MetadataInterfaces},
        token::Token,
    },
    profiler::{AppDomainId, AssemblyId, ClassId, FunctionId, ModuleId},
};

bitflags! {
    /// Notifications and runtime behaviour requested by the agent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        /// Module load and unload notifications
        const MONITOR_MODULE_LOADS = 0x0000_0004;
        /// Assembly load and unload notifications
        const MONITOR_ASSEMBLY_LOADS = 0x0000_0008;
        /// JIT compilation notifications
        const MONITOR_JIT_COMPILATION = 0x0000_0020;
        /// Never inline methods
        const DISABLE_INLINING = 0x0000_2000;
        /// Compile without optimizations
        const DISABLE_OPTIMIZATIONS = 0x0000_4000;
        /// Skip transparency checks for full-trust code
        const DISABLE_TRANSPARENCY_CHECKS_UNDER_FULL_TRUST = 0x1000_0000;
        /// Ignore precompiled images so every method is compiled
        const DISABLE_ALL_NGEN_IMAGES = 0x8000_0000;
    }
}

bitflags! {
    /// Properties of a loaded module.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModuleFlags: u32 {
        /// Loaded from disk
        const DISK = 0x0000_0001;
        /// Precompiled image
        const NGEN = 0x0000_0002;
        /// Created by reflection emit
        const DYNAMIC = 0x0000_0004;
        /// Part of a collectible assembly
        const COLLECTIBLE = 0x0000_0008;
        /// Resource-only module
        const RESOURCE = 0x0000_0010;
        /// Mapped with flat layout
        const FLAT_LAYOUT = 0x0000_0020;
        /// Windows Runtime metadata module
        const WINDOWS_RUNTIME = 0x0000_0040;
    }
}

/// Properties of a loaded module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    /// File path or name of the module
    pub path: U16String,
    /// Owning assembly
    pub assembly_id: AssemblyId,
    /// Module flags
    pub flags: ModuleFlags,
}

impl ModuleInfo {
    /// Returns true for Windows Runtime metadata modules, which cannot be rewritten.
    #[must_use]
    pub fn is_windows_runtime(&self) -> bool {
        self.flags.contains(ModuleFlags::WINDOWS_RUNTIME)
    }
}

/// Properties of a loaded assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyInfo {
    /// Simple name
    pub name: U16String,
    /// Domain the assembly was loaded into
    pub app_domain_id: AppDomainId,
    /// Manifest module
    pub module_id: ModuleId,
}

/// Identity of a method being compiled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionProps {
    /// Declaring class
    pub class_id: ClassId,
    /// Module defining the method
    pub module_id: ModuleId,
    /// `MethodDef` token of the method
    pub token: Token,
}

/// Queries and updates the agent can issue against the runtime.
///
/// Obtained during initialization; every method may be called from any runtime thread.
pub trait ProfilerInfo: Send + Sync {
    /// Properties of `module`.
    fn get_module_info(&self, module: ModuleId) -> HostResult<ModuleInfo>;

    /// Properties of `assembly`.
    fn get_assembly_info(&self, assembly: AssemblyId) -> HostResult<AssemblyInfo>;

    /// Module and token of `function`.
    fn get_function_info(&self, function: FunctionId) -> HostResult<FunctionProps>;

    /// Readable and writable metadata of `module`.
    fn get_module_metadata(&self, module: ModuleId) -> HostResult<MetadataInterfaces>;

    /// Method body (header, code and sections) of `method` in `module`.
    fn get_il_function_body(&self, module: ModuleId, method: Token) -> HostResult<Vec<u8>>;

    /// Replace the method body of `method` in `module`.
    fn set_il_function_body(&self, module: ModuleId, method: Token, body: &[u8]) -> HostResult<()>;

    /// Request notifications and runtime behaviour.
    fn set_event_mask(&self, mask: EventMask) -> HostResult<()>;
}

/// Assembly name of `module`, resolved through its owning assembly.
///
/// # Errors
/// Returns [`crate::Error::HostCall`] if either lookup fails.
pub fn module_assembly(
    info: &dyn ProfilerInfo,
    module: ModuleId,
) -> crate::Result<(ModuleInfo, AssemblyInfo)> {
    let module_info = info
        .get_module_info(module)
        .map_err(|hresult| host_error!("GetModuleInfo", hresult))?;
    let assembly = info
        .get_assembly_info(module_info.assembly_id)
        .map_err(|hresult| host_error!("GetAssemblyInfo", hresult))?;
    Ok((module_info, assembly))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_runtime_flag() {
        let mut info = ModuleInfo::default();
        assert!(!info.is_windows_runtime());

        info.flags = ModuleFlags::DISK | ModuleFlags::WINDOWS_RUNTIME;
        assert!(info.is_windows_runtime());
    }

    #[test]
    fn event_mask_bits() {
        let mask = EventMask::MONITOR_JIT_COMPILATION
            | EventMask::MONITOR_MODULE_LOADS
            | EventMask::DISABLE_ALL_NGEN_IMAGES;
        assert_eq!(mask.bits(), 0x8000_0024);
    }
}
