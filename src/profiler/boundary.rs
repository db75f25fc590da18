//! The runtime-facing boundary: callback interface, version negotiation, instance creation and
//! the process-wide agent accessor.
//!
//! The runtime talks to the agent through reference-counted interface pointers. This module
//! keeps that contract in one place: [`ProfilerHandle`] carries the reference count and the
//! negotiated interface version, everything behind it is plain Rust.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, OnceLock,
};

use strum::{Display, EnumIter, IntoEnumIterator};
use uguid::{guid, Guid};

use crate::{
    metadata::host::HResult,
    profiler::{info::ProfilerInfo, AssemblyId, FunctionId, ModuleId},
};

/// Notifications the runtime delivers to an agent.
///
/// Every handler returns an [`HResult`]; apart from [`ProfilerCallback::initialize`] the
/// runtime ignores failures, so implementations report [`HResult::S_OK`] and log problems
/// instead.
pub trait ProfilerCallback: Send + Sync {
    /// The agent was loaded; `info` stays valid until shutdown.
    fn initialize(&self, info: Arc<dyn ProfilerInfo>) -> HResult;

    /// The runtime is shutting down.
    fn shutdown(&self) -> HResult;

    /// An assembly finished loading with `status`.
    fn assembly_load_finished(&self, _assembly_id: AssemblyId, _status: HResult) -> HResult {
        HResult::S_OK
    }

    /// A module finished loading with `status`.
    fn module_load_finished(&self, module_id: ModuleId, status: HResult) -> HResult;

    /// A module is about to unload.
    fn module_unload_started(&self, module_id: ModuleId) -> HResult;

    /// A method is about to be compiled.
    fn jit_compilation_started(&self, function_id: FunctionId, is_safe_to_block: bool) -> HResult;

    /// Returns true if the agent's library may be unloaded.
    fn can_unload_now(&self) -> bool {
        true
    }
}

/// Versions of the callback interface, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum CallbackVersion {
    /// `ICorProfilerCallback`
    V1,
    /// `ICorProfilerCallback2`
    V2,
    /// `ICorProfilerCallback3`
    V3,
    /// `ICorProfilerCallback4`
    V4,
    /// `ICorProfilerCallback5`
    V5,
    /// `ICorProfilerCallback6`
    V6,
    /// `ICorProfilerCallback7`
    V7,
    /// `ICorProfilerCallback8`
    V8,
}

impl CallbackVersion {
    /// The newest version the agent implements.
    pub const HIGHEST: CallbackVersion = CallbackVersion::V8;

    /// Interface identifier of this version.
    #[must_use]
    pub fn iid(self) -> Guid {
        match self {
            CallbackVersion::V1 => guid!("176fbed1-a55c-4796-98ca-a9da0ef883e7"),
            CallbackVersion::V2 => guid!("8a8cc829-ccf2-49fe-bbae-0f022228071a"),
            CallbackVersion::V3 => guid!("4fd2ed52-7731-4b8d-9469-03d2cc3086c5"),
            CallbackVersion::V4 => guid!("7b63b2e3-107d-4d48-b2f6-f61e229470d2"),
            CallbackVersion::V5 => guid!("8dfba405-8c9f-45f8-bffa-83b14cef78b5"),
            CallbackVersion::V6 => guid!("fc13df4b-4448-4f4f-950c-ba8d19d00c36"),
            CallbackVersion::V7 => guid!("f76a2dba-1d52-4539-866c-2aa518f9efc3"),
            CallbackVersion::V8 => guid!("5bed9b15-c079-4d47-bfe2-215a140c07e0"),
        }
    }
}

/// `IUnknown`, answered with the highest callback version.
pub const IID_IUNKNOWN: Guid = guid!("00000000-0000-0000-c000-000000000046");

/// Class id the agent is registered under.
pub const CLSID_PROFILER: Guid = guid!("846f5f1c-f9ae-4b07-969e-05c26bc060d8");

/// Resolve an interface request to the callback version served for it.
///
/// # Errors
/// Returns [`HResult::E_NOINTERFACE`] for identifiers that are neither `IUnknown` nor a known
/// callback version.
pub fn negotiate(iid: Guid) -> Result<CallbackVersion, HResult> {
    if iid == IID_IUNKNOWN {
        return Ok(CallbackVersion::HIGHEST);
    }
    CallbackVersion::iter()
        .filter(|version| *version <= CallbackVersion::HIGHEST)
        .find(|version| version.iid() == iid)
        .ok_or(HResult::E_NOINTERFACE)
}

/// A reference-counted interface pointer to an agent.
pub struct ProfilerHandle {
    callback: Arc<dyn ProfilerCallback>,
    version: CallbackVersion,
    references: AtomicU32,
}

impl ProfilerHandle {
    /// Wrap `callback`, served as `version`, with one reference.
    #[must_use]
    pub fn new(callback: Arc<dyn ProfilerCallback>, version: CallbackVersion) -> Self {
        ProfilerHandle {
            callback,
            version,
            references: AtomicU32::new(1),
        }
    }

    /// The agent behind the handle.
    #[must_use]
    pub fn callback(&self) -> &Arc<dyn ProfilerCallback> {
        &self.callback
    }

    /// Interface version the handle was created for.
    #[must_use]
    pub fn version(&self) -> CallbackVersion {
        self.version
    }

    /// Answer an interface request on this handle, taking a reference on success.
    ///
    /// # Errors
    /// Returns [`HResult::E_NOINTERFACE`] for unknown identifiers.
    pub fn query_interface(&self, iid: Guid) -> Result<CallbackVersion, HResult> {
        let version = negotiate(iid)?;
        self.add_ref();
        Ok(version)
    }

    /// Take a reference; returns the new count.
    pub fn add_ref(&self) -> u32 {
        self.references.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a reference; returns the remaining count. At zero the owner frees the handle.
    pub fn release(&self) -> u32 {
        let previous = self
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Current reference count.
    #[must_use]
    pub fn references(&self) -> u32 {
        self.references.load(Ordering::Acquire)
    }
}

type Constructor = dyn Fn() -> Arc<dyn ProfilerCallback> + Send + Sync;

/// Creates agent instances on the runtime's request.
pub struct ClassFactory {
    constructor: Box<Constructor>,
}

impl ClassFactory {
    /// Create a factory building agents with `constructor`.
    pub fn new(constructor: impl Fn() -> Arc<dyn ProfilerCallback> + Send + Sync + 'static) -> Self {
        ClassFactory {
            constructor: Box::new(constructor),
        }
    }

    /// Create an instance answering `iid`.
    ///
    /// The first instance becomes the process-wide agent; later requests receive handles to
    /// that same agent.
    ///
    /// # Errors
    /// Returns [`HResult::CLASS_E_NOAGGREGATION`] if `aggregate` is set and
    /// [`HResult::E_NOINTERFACE`] for unknown interfaces.
    pub fn create_instance(&self, aggregate: bool, iid: Guid) -> Result<ProfilerHandle, HResult> {
        if aggregate {
            return Err(HResult::CLASS_E_NOAGGREGATION);
        }
        let version = negotiate(iid)?;

        let callback = match active_profiler() {
            Some(active) => active,
            None => {
                let created = (self.constructor)();
                install_profiler(created.clone());
                active_profiler().unwrap_or(created)
            }
        };
        Ok(ProfilerHandle::new(callback, version))
    }
}

static ACTIVE_PROFILER: OnceLock<Arc<dyn ProfilerCallback>> = OnceLock::new();

/// Make `callback` the process-wide agent. Returns false if one was installed already.
pub fn install_profiler(callback: Arc<dyn ProfilerCallback>) -> bool {
    ACTIVE_PROFILER.set(callback).is_ok()
}

/// The process-wide agent, if one was installed.
#[must_use]
pub fn active_profiler() -> Option<Arc<dyn ProfilerCallback>> {
    ACTIVE_PROFILER.get().cloned()
}

/// Returns true if the library may be unloaded.
#[must_use]
pub fn can_unload_now() -> bool {
    active_profiler().map_or(true, |profiler| profiler.can_unload_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl ProfilerCallback for Idle {
        fn initialize(&self, _info: Arc<dyn ProfilerInfo>) -> HResult {
            HResult::S_OK
        }

        fn shutdown(&self) -> HResult {
            HResult::S_OK
        }

        fn module_load_finished(&self, _module_id: ModuleId, _status: HResult) -> HResult {
            HResult::S_OK
        }

        fn module_unload_started(&self, _module_id: ModuleId) -> HResult {
            HResult::S_OK
        }

        fn jit_compilation_started(&self, _function_id: FunctionId, _safe: bool) -> HResult {
            HResult::S_OK
        }
    }

    #[test]
    fn negotiation() {
        for version in CallbackVersion::iter() {
            assert_eq!(negotiate(version.iid()), Ok(version));
        }
        assert_eq!(negotiate(IID_IUNKNOWN), Ok(CallbackVersion::V8));
        assert_eq!(negotiate(CLSID_PROFILER), Err(HResult::E_NOINTERFACE));
        assert_eq!(CallbackVersion::V3.to_string(), "V3");
    }

    #[test]
    fn reference_counting() {
        let handle = ProfilerHandle::new(Arc::new(Idle), CallbackVersion::V8);
        assert_eq!(handle.references(), 1);
        assert_eq!(handle.add_ref(), 2);
        assert_eq!(
            handle.query_interface(CallbackVersion::V5.iid()),
            Ok(CallbackVersion::V5)
        );
        assert_eq!(handle.references(), 3);
        assert!(handle.query_interface(CLSID_PROFILER).is_err());
        assert_eq!(handle.references(), 3);

        assert_eq!(handle.release(), 2);
        assert_eq!(handle.release(), 1);
        assert_eq!(handle.release(), 0);
        assert_eq!(handle.release(), 0);
    }

    #[test]
    fn factory() {
        let factory = ClassFactory::new(|| Arc::new(Idle));
        assert_eq!(
            factory
                .create_instance(true, CallbackVersion::V8.iid())
                .err(),
            Some(HResult::CLASS_E_NOAGGREGATION)
        );
        assert_eq!(
            factory.create_instance(false, CLSID_PROFILER).err(),
            Some(HResult::E_NOINTERFACE)
        );

        let first = factory
            .create_instance(false, CallbackVersion::V4.iid())
            .unwrap();
        let second = factory.create_instance(false, IID_IUNKNOWN).unwrap();
        assert_eq!(first.version(), CallbackVersion::V4);
        assert!(Arc::ptr_eq(first.callback(), second.callback()));
        assert!(active_profiler().is_some());
        assert!(can_unload_now());
    }
}
