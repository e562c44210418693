//! Everything one loop run needs, borrowed for the duration of the run.

use crate::io::config::RefinerConfig;
use crate::io::dependencies::DependencyResolver;
use crate::io::model::{Model, ModelClient};
use crate::io::prompt::PromptBuilder;
use crate::io::prompt_log::PromptLog;
use crate::io::session_store::SessionStore;
use crate::io::workspace::Sandbox;

pub struct LoopContext<'a, S: SessionStore, M: Model, D: DependencyResolver> {
    pub config: &'a RefinerConfig,
    pub sandbox: &'a Sandbox,
    pub store: &'a S,
    pub model: ModelClient<'a, M>,
    pub prompts: PromptBuilder,
    pub resolver: &'a D,
}

impl<'a, S: SessionStore, M: Model, D: DependencyResolver> LoopContext<'a, S, M, D> {
    pub fn new(
        config: &'a RefinerConfig,
        sandbox: &'a Sandbox,
        store: &'a S,
        model: &'a M,
        prompt_log: &'a PromptLog,
        resolver: &'a D,
    ) -> Self {
        Self {
            config,
            sandbox,
            store,
            model: ModelClient::new(model, prompt_log, &config.model),
            prompts: PromptBuilder::new(
                config.model.prompt_budget_bytes,
                &config.language,
                &sandbox.dir_display(),
            ),
            resolver,
        }
    }
}
