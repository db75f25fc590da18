//! Per-module instrumentation state.
//!
//! A [`ModuleRecord`] is created when a module with applicable rules finishes loading and
//! lives until the module unloads. [`ModuleMetadataCache`] maps module ids to records. Each
//! record sits behind its own mutex, so compilation events for one module serialize with that
//! module's unload while unrelated modules proceed in parallel.
//!
//! # Examples
//!
//! ```rust,ignore
//! if let Some(record) = cache.lookup(module_id) {
//!     let record = lock!(record);
//!     if !record.is_released() {
//!         // rewrite using record.wrapper_member_ref(..)
//!     }
//! }
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use dashmap::DashMap;
use log::warn;

use crate::{
    integration::{replacements_for_caller, IntegrationMethod, MethodReplacement},
    metadata::{host::MetadataInterfaces, token::Token},
    profiler::ModuleId,
};

/// Instrumentation state of one loaded module.
#[derive(Debug)]
pub struct ModuleRecord {
    /// Runtime id of the module
    pub module_id: ModuleId,
    /// Simple name of the owning assembly
    pub assembly_name: String,
    /// Metadata interfaces of the module
    pub metadata: MetadataInterfaces,
    /// Token of the module row
    pub module_token: Token,
    integrations: Vec<IntegrationMethod>,
    wrapper_refs: HashMap<String, Token>,
    released: bool,
}

impl ModuleRecord {
    /// Create a record for `module_id` holding the rules in `integrations`.
    #[must_use]
    pub fn new(
        module_id: ModuleId,
        assembly_name: String,
        metadata: MetadataInterfaces,
        module_token: Token,
        integrations: Vec<IntegrationMethod>,
    ) -> Self {
        ModuleRecord {
            module_id,
            assembly_name,
            metadata,
            module_token,
            integrations,
            wrapper_refs: HashMap::new(),
            released: false,
        }
    }

    /// The rules applicable to this module.
    #[must_use]
    pub fn integrations(&self) -> &[IntegrationMethod] {
        &self.integrations
    }

    /// The rules applicable inside `method_name` of `type_name`.
    #[must_use]
    pub fn method_replacements_for_caller(
        &self,
        type_name: &str,
        method_name: &str,
    ) -> Vec<Arc<MethodReplacement>> {
        replacements_for_caller(&self.integrations, type_name, method_name)
    }

    /// The member reference emitted for the wrapper identified by `key`.
    #[must_use]
    pub fn wrapper_member_ref(&self, key: &str) -> Option<Token> {
        self.wrapper_refs.get(key).copied()
    }

    /// Remember the member reference emitted for the wrapper identified by `key`.
    pub fn set_wrapper_member_ref(&mut self, key: String, token: Token) {
        self.wrapper_refs.insert(key, token);
    }

    /// Number of wrapper references emitted into this module.
    #[must_use]
    pub fn wrapper_ref_count(&self) -> usize {
        self.wrapper_refs.len()
    }

    /// Returns true once the module has unloaded; a released record must not be used.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Drop the emitted tokens and rules and mark the record unusable.
    pub fn release(&mut self) {
        self.wrapper_refs.clear();
        self.integrations.clear();
        self.released = true;
    }
}

/// Concurrent map from module id to [`ModuleRecord`].
#[derive(Debug, Default)]
pub struct ModuleMetadataCache {
    modules: DashMap<ModuleId, Arc<Mutex<ModuleRecord>>>,
}

impl ModuleMetadataCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        ModuleMetadataCache::default()
    }

    /// Insert or replace the record of `module_id`.
    ///
    /// A replaced record is released before it is returned.
    pub fn upsert(&self, module_id: ModuleId, record: ModuleRecord) -> Option<Arc<Mutex<ModuleRecord>>> {
        let previous = self
            .modules
            .insert(module_id, Arc::new(Mutex::new(record)));
        if let Some(previous) = &previous {
            release(previous);
        }
        previous
    }

    /// The record of `module_id`, if the module is instrumented.
    ///
    /// The map shard is only held for the lookup; callers lock the returned record for as long
    /// as they use it.
    #[must_use]
    pub fn lookup(&self, module_id: ModuleId) -> Option<Arc<Mutex<ModuleRecord>>> {
        self.modules.get(&module_id).map(|entry| entry.value().clone())
    }

    /// Remove the record of `module_id` and release it.
    ///
    /// Blocks until any compilation currently holding the record's lock is done. Returns
    /// false if the module had no record.
    pub fn erase(&self, module_id: ModuleId) -> bool {
        match self.modules.remove(&module_id) {
            Some((_, record)) => {
                release(&record);
                true
            }
            None => false,
        }
    }

    /// Release and remove every record.
    pub fn clear(&self) {
        let ids: Vec<ModuleId> = self.modules.iter().map(|entry| *entry.key()).collect();
        for module_id in ids {
            self.erase(module_id);
        }
    }

    /// Number of instrumented modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if no module is instrumented.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Release `record`, recovering it if a compilation panicked while holding its lock.
fn release(record: &Mutex<ModuleRecord>) {
    let mut record = record.lock().unwrap_or_else(|poisoned| {
        warn!("Module record lock was poisoned, releasing it anyway");
        PoisonError::into_inner(poisoned)
    });
    record.release();
}
