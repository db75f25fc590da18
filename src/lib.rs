// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # dotweave
//!
//! [![Crates.io](https://img.shields.io/crates/v/dotweave.svg)](https://crates.io/crates/dotweave)
//! [![Documentation](https://docs.rs/dotweave/badge.svg)](https://docs.rs/dotweave)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/dotweave/blob/main/LICENSE-APACHE)
//!
//! A call-site instrumentation engine for .NET runtimes. `dotweave` is loaded by the runtime as a
//! profiling agent, watches modules load, and rewrites CIL method bodies right before they are
//! compiled so that calls to selected target methods go through wrapper methods instead.
//!
//! ## Features
//!
//! - **📄 Declarative integrations** - JSON rules naming callers, targets and wrappers
//! - **🔍 Token resolution** - Type and method descriptors read through the runtime's metadata interfaces
//! - **✍️ Metadata emission** - Assembly, type and member references added to instrumented modules
//! - **🔧 IL rewriting** - Method bodies decoded into an editable instruction list and re-encoded
//!   with branch widening, exception clause fix-ups and header promotion
//! - **🧵 Concurrent by default** - Module records are shared between load, unload and JIT callbacks
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! dotweave = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust,no_run
//! use dotweave::prelude::*;
//!
//! let integrations = load_integrations_from_str(r#"[{ "name": "Example", "method_replacements": [] }]"#)?;
//! println!("{} integrations", integrations.len());
//! # Ok::<(), dotweave::Error>(())
//! ```
//!
//! ### Rewriting a Method Body
//!
//! The [`assembly::ILRewriter`] is usable on its own, without a runtime:
//!
//! ```rust
//! use dotweave::assembly::{opcodes, ILRewriter, Operand};
//!
//! // ldc.i4.1; ret
//! let mut rewriter = ILRewriter::new();
//! rewriter.import(&[0x0A, 0x17, 0x2A])?;
//!
//! let ret = rewriter.last().unwrap();
//! rewriter.insert_before(ret, opcodes::POP, Operand::None)?;
//! rewriter.insert_before(ret, opcodes::LDC_I4_2, Operand::None)?;
//!
//! let body = rewriter.export()?;
//! assert_eq!(body, [0x12, 0x17, 0x26, 0x18, 0x2A]);
//! # Ok::<(), dotweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - Settings read from the process environment
//! - [`integration`] - Integration rules, their loader and selection filters
//! - [`metadata`] - Runtime metadata interfaces, token resolution and reference emission
//! - [`cache`] - Per-module records shared between runtime callbacks
//! - [`assembly`] - CIL opcodes and the method body rewriter
//! - [`profiler`] - The agent, the call-site replacement pass and the runtime boundary
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Runtime callbacks never propagate
//! these errors to the runtime: they are logged through the [`log`] facade and the callback
//! reports success, so a failure to instrument one method leaves it running unmodified.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use dotweave::prelude::*;
///
/// let config = Config::from_env(&ProcessEnvironment);
/// let profiler = Profiler::new(config);
/// assert!(!profiler.is_attached());
/// ```
pub mod prelude;

/// Byte-level reading and writing helpers
pub mod file;

/// CIL opcodes, instruction representation and the method body rewriter.
///
/// # Example
///
/// ```rust
/// use dotweave::assembly::{ILRewriter, RewriterState};
///
/// let mut rewriter = ILRewriter::new();
/// assert_eq!(rewriter.state(), RewriterState::Unparsed);
/// rewriter.import(&[0x06, 0x2A])?;
/// assert_eq!(rewriter.len(), 1);
/// # Ok::<(), dotweave::Error>(())
/// ```
pub mod assembly;

/// Settings of the agent, read from environment variables
pub mod config;

/// Integration rules and their selection
pub mod integration;

/// Access to module metadata through the runtime's interfaces.
///
/// The runtime hands out four interfaces per module, modelled by the traits in
/// [`metadata::host`]. [`metadata::resolver::TokenResolver`] reads descriptors through them and
/// [`metadata::emitter::MetadataBuilder`] adds the references the wrappers need.
pub mod metadata;

/// Per-module state shared between runtime callbacks
pub mod cache;

/// The instrumentation agent and the runtime boundary
pub mod profiler;

/// `dotweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotweave` Error type
///
/// # Examples
///
/// ```rust
/// use dotweave::{assembly::ILRewriter, Error};
///
/// let mut rewriter = ILRewriter::new();
/// match rewriter.export() {
///     Err(Error::InvalidState(message)) => println!("not ready: {message}"),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub use error::Error;

/// Bounds-checked reader over a byte slice
pub use file::parser::Parser;
