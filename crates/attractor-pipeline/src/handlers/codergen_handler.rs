//! CodergenHandler — the default node handler (shape="box").
//!
//! Runs the node's `prompt` through a one-shot [`attractor_agent::AgentSession`]
//! backed by whichever LLM provider credentials are present in the
//! environment, with the provider's matching [`attractor_tools::ToolProfile`]
//! registered so the agent can read/write files and run shell commands.

use std::path::Path;

use async_trait::async_trait;
use attractor_agent::{AgentSession, SessionConfig};
use attractor_llm::LlmClient;
use attractor_tools::{LocalExecutionEnvironment, ToolProfile};
use attractor_types::{AttractorError, Context, Outcome, Result, StageStatus};
use indexmap::IndexMap;

use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;

pub struct CodergenHandler;

fn build_llm_client() -> LlmClient {
    let mut client = LlmClient::new();
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        client.register_provider(attractor_llm::AnthropicAdapter::new(key));
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        client.register_provider(attractor_llm::OpenAiAdapter::new(key));
    }
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        client.register_provider(attractor_llm::GeminiAdapter::new(key));
    }
    client
}

fn tool_profile_for(provider: Option<&str>) -> ToolProfile {
    match provider {
        Some("openai") => ToolProfile::openai(),
        Some("gemini") => ToolProfile::gemini(),
        _ => ToolProfile::anthropic(),
    }
}

#[async_trait]
impl NodeHandler for CodergenHandler {
    fn handler_type(&self) -> &str {
        "codergen"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        context: &Context,
        _graph: &PipelineGraph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let prompt = node.prompt.clone().ok_or_else(|| AttractorError::HandlerError {
            handler: "codergen".into(),
            node: node.id.clone(),
            message: "Missing prompt attribute".into(),
        })?;

        let model = node
            .llm_model
            .clone()
            .unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string());

        let workdir = context.get("workdir", ".").await;
        let env = LocalExecutionEnvironment::new(workdir);
        let registry = tool_profile_for(node.llm_provider.as_deref()).build_registry();

        let config = SessionConfig {
            model,
            system_prompt: "You are an autonomous coding agent executing one pipeline stage.".to_string(),
            ..Default::default()
        };

        let mut session = AgentSession::new(build_llm_client(), registry, Box::new(env), config);

        let response = session.process_input(&prompt).await?;

        if logs_root.as_os_str() != std::ffi::OsStr::new("") {
            if tokio::fs::create_dir_all(logs_root).await.is_ok() {
                let path = logs_root.join(format!("{}.transcript.txt", node.id));
                if let Err(e) = tokio::fs::write(&path, &response).await {
                    tracing::warn!(node = %node.id, error = %e, "failed to write codergen transcript");
                }
            }
        }

        let mut updates = IndexMap::new();
        updates.insert(format!("{}.output", node.id), response.clone());
        updates.insert(format!("{}.completed", node.id), "true".to_string());

        Ok(Outcome {
            status: StageStatus::Success,
            context_updates: updates,
            notes: response,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::make_node;

    #[tokio::test]
    async fn errors_when_prompt_missing() {
        let handler = CodergenHandler;
        let node = make_node("gen", "box", None, IndexMap::new());
        let ctx = Context::default();
        let graph = {
            let parsed = attractor_dot::parse("digraph G { A -> B }").unwrap();
            PipelineGraph::from_dot(parsed).unwrap()
        };

        let result = handler.execute(&node, &ctx, &graph, &std::env::temp_dir()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Missing prompt"));
    }

    #[test]
    fn tool_profile_selection_matches_provider_attr() {
        assert_eq!(tool_profile_for(Some("openai")).name, "openai");
        assert_eq!(tool_profile_for(Some("gemini")).name, "gemini");
        assert_eq!(tool_profile_for(None).name, "anthropic");
        assert_eq!(tool_profile_for(Some("anthropic")).name, "anthropic");
    }
}
