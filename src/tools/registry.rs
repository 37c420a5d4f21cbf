use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::error::ToolError;
use crate::llm::ModelToolDefinition;
use crate::tools::{Function, Tool};

/// What [`ToolRegistry::register`] does when a function name is already taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Refuse the tool with [`ToolError::DuplicateFunction`].
    #[default]
    Reject,
    /// Accept the tool; dispatch binds to the first match in registration order.
    FirstWins,
}

/// The active tool set. Cloning shares the same underlying set.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<Vec<Arc<Tool>>>>,
    policy: CollisionPolicy,
}

impl ToolRegistry {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            tools: Arc::default(),
            policy,
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    pub fn register(&self, tool: Arc<Tool>) -> Result<(), ToolError> {
        let mut tools = self.write();
        if tools.iter().any(|active| Arc::ptr_eq(active, &tool)) {
            return Ok(());
        }

        let mut names = tools
            .iter()
            .flat_map(|active| active.functions())
            .map(|function| function.name().to_string())
            .collect::<HashSet<_>>();

        for function in tool.functions() {
            if names.insert(function.name().to_string()) {
                continue;
            }
            match self.policy {
                CollisionPolicy::Reject => {
                    return Err(ToolError::DuplicateFunction {
                        name: function.name().to_string(),
                    });
                }
                CollisionPolicy::FirstWins => warn!(
                    function = function.name(),
                    tool = tool.name(),
                    "function name already active; the earlier registration wins"
                ),
            }
        }

        debug!(tool = tool.name(), functions = tool.functions().len(), "tool registered");
        tools.push(tool);
        Ok(())
    }

    pub fn unregister(&self, tool: &Arc<Tool>) {
        self.write().retain(|active| !Arc::ptr_eq(active, tool));
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn contains(&self, tool: &Arc<Tool>) -> bool {
        self.read().iter().any(|active| Arc::ptr_eq(active, tool))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Function>, ToolError> {
        self.snapshot().resolve(name)
    }

    /// Copy of the active set; later membership changes do not affect it.
    pub fn snapshot(&self) -> ToolSet {
        ToolSet {
            tools: self.read().clone(),
        }
    }

    /// Forces the last of `functions` and clears every other forced flag.
    /// The flag is cleared again when the guard drops.
    pub fn force(&self, functions: &[Arc<Function>]) -> ForceGuard {
        let Some(preferred) = functions.last() else {
            return ForceGuard { function: None };
        };

        if functions.len() > 1 {
            warn!(
                preferred = preferred.name(),
                requested = functions.len(),
                "multiple functions forced; preferring the last one"
            );
        }

        let active = self.snapshot();
        for function in active.functions().chain(functions.iter()) {
            if !Arc::ptr_eq(function, preferred) {
                function.set_force_call(false);
            }
        }
        preferred.set_force_call(true);

        ForceGuard {
            function: Some(preferred.clone()),
        }
    }

    /// Registers `tools` until the returned scope drops. Tools that were
    /// already active stay active afterwards.
    pub fn scoped(&self, tools: &[Arc<Tool>]) -> Result<ToolScope, ToolError> {
        let mut scope = ToolScope {
            registry: self.clone(),
            added: Vec::new(),
        };

        for tool in tools {
            if self.contains(tool) {
                continue;
            }
            // on error the partially built scope drops and unregisters what it added
            self.register(tool.clone())?;
            scope.added.push(tool.clone());
        }

        Ok(scope)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Tool>>> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Tool>>> {
        self.tools.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A turn's view of the active tools.
#[derive(Clone, Debug, Default)]
pub struct ToolSet {
    tools: Vec<Arc<Tool>>,
}

impl ToolSet {
    pub fn tools(&self) -> &[Arc<Tool>] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<Function>> {
        self.tools.iter().flat_map(|tool| tool.functions())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<Function>> {
        self.functions().filter(|function| !function.is_disabled())
    }

    /// First enabled function with `name`, in registration order.
    pub fn resolve(&self, name: &str) -> Result<Arc<Function>, ToolError> {
        self.enabled()
            .find(|function| function.name() == name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Enabled functions the model sees, one per name. A shadowed duplicate
    /// is skipped, so everything offered is what `resolve` dispatches to.
    fn offered(&self) -> impl Iterator<Item = &Arc<Function>> {
        let mut seen = HashSet::new();
        self.enabled()
            .filter(move |function| seen.insert(function.name()))
    }

    pub fn definitions(&self) -> Vec<ModelToolDefinition> {
        self.offered()
            .map(|function| function.definition())
            .collect()
    }

    /// The forced function among those offered, if any. With several
    /// flagged, the last one encountered wins and the conflict is logged.
    pub fn forced(&self) -> Option<Arc<Function>> {
        let forced = self
            .offered()
            .filter(|function| function.is_forced())
            .collect::<Vec<_>>();

        let preferred = forced.last()?;
        if forced.len() > 1 {
            warn!(
                preferred = preferred.name(),
                overridden = forced[..forced.len() - 1]
                    .iter()
                    .map(|function| function.name())
                    .collect::<Vec<_>>()
                    .join(", "),
                "multiple forced functions active; preferring the last one"
            );
        }

        Some(Arc::clone(preferred))
    }

    pub fn preamble(&self) -> Option<String> {
        let prompts = self
            .tools
            .iter()
            .map(|tool| tool.prompt().trim())
            .filter(|prompt| !prompt.is_empty())
            .collect::<Vec<_>>();

        if prompts.is_empty() {
            None
        } else {
            Some(prompts.join("\n\n"))
        }
    }
}

/// Clears the forced flag it set when dropped.
#[must_use = "the function stays forced only while the guard is alive"]
#[derive(Debug)]
pub struct ForceGuard {
    function: Option<Arc<Function>>,
}

impl ForceGuard {
    pub fn function(&self) -> Option<&Arc<Function>> {
        self.function.as_ref()
    }
}

impl Drop for ForceGuard {
    fn drop(&mut self) {
        if let Some(function) = &self.function {
            function.set_force_call(false);
        }
    }
}

/// Unregisters the tools it added when dropped.
#[must_use = "the tools are unregistered as soon as the scope drops"]
#[derive(Debug)]
pub struct ToolScope {
    registry: ToolRegistry,
    added: Vec<Arc<Tool>>,
}

impl Drop for ToolScope {
    fn drop(&mut self) {
        for tool in &self.added {
            self.registry.unregister(tool);
        }
    }
}
