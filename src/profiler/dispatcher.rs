//! Hosts several agents in one process behind a single callback.

use std::sync::Arc;

use log::debug;

use crate::{
    metadata::host::HResult,
    profiler::{boundary::ProfilerCallback, info::ProfilerInfo, AssemblyId, FunctionId, ModuleId},
};

/// Forwards every notification to each registered agent in registration order.
#[derive(Default)]
pub struct Dispatcher {
    agents: Vec<Arc<dyn ProfilerCallback>>,
}

impl Dispatcher {
    /// Create a dispatcher without agents.
    #[must_use]
    pub fn new() -> Self {
        Dispatcher::default()
    }

    /// Append `agent`; it receives notifications after every agent registered before it.
    pub fn register(&mut self, agent: Arc<dyn ProfilerCallback>) {
        self.agents.push(agent);
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns true if no agent is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Call `notify` on every agent and return the first failure, or `S_OK`.
    fn forward(&self, notify: impl Fn(&dyn ProfilerCallback) -> HResult) -> HResult {
        self.agents
            .iter()
            .map(|agent| notify(agent.as_ref()))
            .fold(HResult::S_OK, |first, result| {
                if first.failed() {
                    first
                } else {
                    result
                }
            })
    }
}

impl ProfilerCallback for Dispatcher {
    /// Succeeds if at least one agent attached.
    fn initialize(&self, info: Arc<dyn ProfilerInfo>) -> HResult {
        let attached = self
            .agents
            .iter()
            .filter(|agent| agent.initialize(info.clone()).succeeded())
            .count();
        debug!("{} of {} agents attached", attached, self.agents.len());

        if attached > 0 {
            HResult::S_OK
        } else {
            HResult::E_FAIL
        }
    }

    fn shutdown(&self) -> HResult {
        self.forward(|agent| agent.shutdown())
    }

    fn assembly_load_finished(&self, assembly_id: AssemblyId, status: HResult) -> HResult {
        self.forward(|agent| agent.assembly_load_finished(assembly_id, status))
    }

    fn module_load_finished(&self, module_id: ModuleId, status: HResult) -> HResult {
        self.forward(|agent| agent.module_load_finished(module_id, status))
    }

    fn module_unload_started(&self, module_id: ModuleId) -> HResult {
        self.forward(|agent| agent.module_unload_started(module_id))
    }

    fn jit_compilation_started(&self, function_id: FunctionId, is_safe_to_block: bool) -> HResult {
        self.forward(|agent| agent.jit_compilation_started(function_id, is_safe_to_block))
    }

    fn can_unload_now(&self) -> bool {
        self.agents.iter().all(|agent| agent.can_unload_now())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test::runtime::NullInfo;

    struct Recording {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        initialize: HResult,
        unloadable: bool,
    }

    impl Recording {
        fn record(&self, event: &str) {
            lock!(self.journal).push(format!("{}:{}", self.name, event));
        }
    }

    impl ProfilerCallback for Recording {
        fn initialize(&self, _info: Arc<dyn ProfilerInfo>) -> HResult {
            self.record("initialize");
            self.initialize
        }

        fn shutdown(&self) -> HResult {
            self.record("shutdown");
            HResult::S_OK
        }

        fn module_load_finished(&self, module_id: ModuleId, _status: HResult) -> HResult {
            self.record(&format!("load {module_id}"));
            HResult::S_OK
        }

        fn module_unload_started(&self, module_id: ModuleId) -> HResult {
            self.record(&format!("unload {module_id}"));
            HResult::S_FALSE
        }

        fn jit_compilation_started(&self, function_id: FunctionId, _safe: bool) -> HResult {
            self.record(&format!("jit {function_id}"));
            if self.name == "a" {
                HResult::E_FAIL
            } else {
                HResult::S_OK
            }
        }

        fn can_unload_now(&self) -> bool {
            self.unloadable
        }
    }

    fn build(
        initialize: [HResult; 2],
        unloadable: [bool; 2],
    ) -> (Dispatcher, Arc<Mutex<Vec<String>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        for (index, name) in ["a", "b"].into_iter().enumerate() {
            dispatcher.register(Arc::new(Recording {
                name,
                journal: journal.clone(),
                initialize: initialize[index],
                unloadable: unloadable[index],
            }));
        }
        (dispatcher, journal)
    }

    #[test]
    fn forwards_in_registration_order() {
        let (dispatcher, journal) = build([HResult::S_OK; 2], [true; 2]);
        let info = NullInfo::shared();

        assert_eq!(dispatcher.initialize(info), HResult::S_OK);
        assert_eq!(dispatcher.module_load_finished(7, HResult::S_OK), HResult::S_OK);
        assert_eq!(dispatcher.jit_compilation_started(9, true), HResult::E_FAIL);
        assert_eq!(dispatcher.module_unload_started(7), HResult::S_FALSE);
        assert_eq!(dispatcher.shutdown(), HResult::S_OK);

        assert_eq!(
            *lock!(journal),
            [
                "a:initialize",
                "b:initialize",
                "a:load 7",
                "b:load 7",
                "a:jit 9",
                "b:jit 9",
                "a:unload 7",
                "b:unload 7",
                "a:shutdown",
                "b:shutdown",
            ]
        );
    }

    #[test]
    fn initialize_needs_one_agent() {
        let info = NullInfo::shared();

        let (dispatcher, _) = build([HResult::E_FAIL, HResult::S_OK], [true; 2]);
        assert_eq!(dispatcher.initialize(info.clone()), HResult::S_OK);

        let (dispatcher, _) = build([HResult::E_FAIL; 2], [true; 2]);
        assert_eq!(dispatcher.initialize(info.clone()), HResult::E_FAIL);

        assert_eq!(Dispatcher::new().initialize(info), HResult::E_FAIL);
    }

    #[test]
    fn unload_needs_every_agent() {
        let (dispatcher, _) = build([HResult::S_OK; 2], [true, false]);
        assert!(!dispatcher.can_unload_now());

        let (dispatcher, _) = build([HResult::S_OK; 2], [true, true]);
        assert!(dispatcher.can_unload_now());
        assert!(Dispatcher::new().can_unload_now());
    }
}
