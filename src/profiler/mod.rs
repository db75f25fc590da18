//! The instrumentation agent and its runtime boundary.
//!
//! - [`Profiler`] decides which modules and methods to instrument and drives the rewrite.
//! - [`replace_call_sites`] is the per-method replacement pass.
//! - [`ProfilerCallback`] is the notification interface the runtime calls; [`Dispatcher`]
//!   fans it out to several agents.
//! - [`ProfilerInfo`] is the set of runtime services the agent calls back into.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotweave::config::{Config, ProcessEnvironment};
//! use dotweave::profiler::{install_profiler, Profiler};
//!
//! let profiler = Profiler::new(Config::from_env(&ProcessEnvironment));
//! install_profiler(Arc::new(profiler));
//! ```

mod agent;
mod boundary;
mod dispatcher;
mod info;
mod replace;

pub use agent::{Profiler, SKIPPED_ASSEMBLIES};
pub use boundary::{
    active_profiler, can_unload_now, install_profiler, negotiate, CallbackVersion, ClassFactory,
    ProfilerCallback, ProfilerHandle, CLSID_PROFILER, IID_IUNKNOWN,
};
pub use dispatcher::Dispatcher;
pub use info::{
    module_assembly, AssemblyInfo, EventMask, FunctionProps, ModuleFlags, ModuleInfo, ProfilerInfo,
};
pub use replace::{replace_call_sites, MIN_WRAPPER_SIGNATURE_LEN};

/// Runtime id of a loaded module.
pub type ModuleId = usize;

/// Runtime id of a method.
pub type FunctionId = usize;

/// Runtime id of a loaded assembly.
pub type AssemblyId = usize;

/// Runtime id of an application domain.
pub type AppDomainId = usize;

/// Runtime id of a loaded class.
pub type ClassId = usize;
