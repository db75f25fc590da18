//! Metadata access for instrumented modules.
//!
//! The runtime owns the metadata of every loaded module. This module wraps the runtime's
//! import and emit interfaces with the pieces the instrumentation engine needs on top:
//!
//! - [`token`] - Metadata table row references
//! - [`host`] - Traits describing the runtime's metadata interfaces
//! - [`enumerator`] - Lazy batched iteration over token enumerations
//! - [`signatures`] - Method signature decoding
//! - [`method`] - Method body headers and exception handling sections
//! - [`resolver`] - Turning tokens into names, types and signatures
//! - [`emitter`] - Defining assembly, member and method-spec references on demand

/// Batched enumeration of metadata tokens
pub mod enumerator;
/// Reference definitions emitted into instrumented modules
pub mod emitter;
/// Interfaces of the hosting runtime
pub mod host;
/// Method body header and exception section encoding
pub mod method;
/// Token resolution into descriptors
pub mod resolver;
/// Method signature parsing
pub mod signatures;
/// Commonly used metadata token type
pub mod token;
