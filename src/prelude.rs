//! # dotweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotweave library. Import it to get the agent, its configuration, the integration
//! catalog and the rewriter in one line.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotweave operations
pub use crate::Error;

/// The result type used throughout dotweave
pub use crate::Result;

/// Metadata token
pub use crate::metadata::token::Token;

// ================================================================================================
// Configuration
// ================================================================================================

/// Agent settings and the environment they are read from
pub use crate::config::{Config, Environment, MapEnvironment, ProcessEnvironment};

// ================================================================================================
// Integrations
// ================================================================================================

/// Replacement rules
pub use crate::integration::{
    AssemblyReference, CallerRestriction, Integration, IntegrationMethod, MethodReplacement,
    TargetMethod, Version, WrapperMethod,
};

/// Loading and selecting rules
pub use crate::integration::{
    filter_by_caller, filter_by_name, filter_by_target, flatten_integrations,
    load_integrations, load_integrations_from_file, load_integrations_from_str,
};

// ================================================================================================
// Metadata Access
// ================================================================================================

/// Runtime metadata interfaces
pub use crate::metadata::host::{
    AssemblyEmit, AssemblyImport, HResult, HostResult, MetadataEmit, MetadataImport,
    MetadataInterfaces,
};

/// Descriptor lookup and reference emission
pub use crate::metadata::{
    emitter::{define_method_spec, MetadataBuilder},
    resolver::{FunctionInfo, TokenResolver, TypeInfo},
    signatures::MethodSignature,
};

/// Per-module state
pub use crate::cache::{ModuleMetadataCache, ModuleRecord};

// ================================================================================================
// IL Rewriting
// ================================================================================================

/// Method body rewriting
pub use crate::assembly::{opcodes, ILRewriter, InstrId, Instruction, InstructionCursor, Operand};

// ================================================================================================
// Agent
// ================================================================================================

/// The agent and its runtime boundary
pub use crate::profiler::{
    install_profiler, replace_call_sites, ClassFactory, Dispatcher, Profiler, ProfilerCallback,
    ProfilerInfo,
};
