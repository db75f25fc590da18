//! The integration catalog.
//!
//! An [`Integration`] is a named bundle of [`MethodReplacement`] rules, each saying "calls to
//! this target method are redirected to that wrapper method". Integrations are loaded once at
//! attach time ([`load_integrations`]) and shared read-only by every module afterwards; the
//! `filter_*` functions narrow the catalog down to the rules relevant to one module or one caller.
//!
//! # Examples
//!
//! ```rust
//! use dotweave::integration::{filter_by_caller, flatten_integrations, load_integrations_from_str};
//!
//! let integrations = load_integrations_from_str(r#"[{
//!     "name": "Http",
//!     "method_replacements": [{
//!         "target": { "assembly": "System.Net.Http", "type": "System.Net.Http.HttpClient", "method": "SendAsync",
//!                     "signature_types": ["_", "System.Net.Http.HttpRequestMessage", "_"] },
//!         "wrapper": { "assembly": "Acme.Tracing", "type": "Acme.Tracing.HttpWrappers", "method": "SendAsync",
//!                      "signature": "20 04 1C 1C 08 08 0A" }
//!     }]
//! }]"#)?;
//!
//! let rules = filter_by_caller(&flatten_integrations(&integrations), "MyApp");
//! assert_eq!(rules.len(), 1);
//! # Ok::<(), dotweave::Error>(())
//! ```

mod filters;
mod loader;
mod types;

pub use filters::{
    filter_by_caller, filter_by_name, filter_by_target, flatten_integrations,
    replacements_for_caller,
};
pub use loader::{load_integrations, load_integrations_from_file, load_integrations_from_str};
pub use types::{
    AssemblyReference, CallerRestriction, Integration, IntegrationMethod, MethodReplacement,
    TargetMethod, Version, WrapperMethod, WILDCARD,
};
