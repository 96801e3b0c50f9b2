use crate::context::{ContextCompactor, TieredCompactor, TokenEstimator};
use crate::dispatcher::ToolDispatcher;
use crate::llm::ModelProvider;
use crate::tools::ToolRegistry;
use crate::types::AgentConfig;
use std::sync::Arc;

use super::{Agent, CancelHandle};

/// Builder for constructing an `Agent`.
///
/// # Example
///
/// ```ignore
/// let agent = Agent::builder()
///     .provider(my_provider)
///     .tools(my_tools)
///     .config(AgentConfig::default().with_max_iterations(50))
///     .build();
/// ```
pub struct AgentBuilder<P> {
    provider: P,
    dispatcher: Option<ToolDispatcher>,
    compactor: Option<Arc<dyn ContextCompactor>>,
    config: Option<AgentConfig>,
    cancel: Option<CancelHandle>,
}

impl AgentBuilder<()> {
    /// Create a new builder with no components set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: (),
            dispatcher: None,
            compactor: None,
            config: None,
            cancel: None,
        }
    }
}

impl Default for AgentBuilder<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> AgentBuilder<P> {
    /// Set the model provider.
    #[must_use]
    pub fn provider<P2: ModelProvider>(self, provider: P2) -> AgentBuilder<P2> {
        AgentBuilder {
            provider,
            dispatcher: self.dispatcher,
            compactor: self.compactor,
            config: self.config,
            cancel: self.cancel,
        }
    }

    /// Use a registry of local tools. Replaces any dispatcher set before.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.dispatcher = Some(ToolDispatcher::with_tools(tools));
        self
    }

    /// Use a fully assembled dispatcher (local tools, remote providers and
    /// middleware).
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: ToolDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Use a custom compactor instead of the one derived from
    /// `AgentConfig::compaction`.
    #[must_use]
    pub fn compactor<C: ContextCompactor + 'static>(mut self, compactor: C) -> Self {
        self.compactor = Some(Arc::new(compactor));
        self
    }

    /// Set the agent configuration.
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl<P: ModelProvider + 'static> AgentBuilder<P> {
    /// Build the agent.
    ///
    /// Uses an empty dispatcher and `AgentConfig::default()` when those were
    /// not set. When the config carries a `compaction` section and no custom
    /// compactor was given, a [`TieredCompactor`] over the same provider is
    /// created.
    #[must_use]
    pub fn build(self) -> Agent<P> {
        let provider = Arc::new(self.provider);
        let config = self.config.unwrap_or_default();
        let compactor = self.compactor.or_else(|| {
            config.compaction.clone().map(|compaction| {
                Arc::new(TieredCompactor::new(
                    Arc::clone(&provider),
                    compaction,
                    TokenEstimator::default(),
                )) as Arc<dyn ContextCompactor>
            })
        });

        Agent {
            provider,
            dispatcher: Arc::new(self.dispatcher.unwrap_or_default()),
            compactor,
            config,
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}
