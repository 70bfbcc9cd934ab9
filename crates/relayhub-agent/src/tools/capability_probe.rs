//! Tool: capability_probe — answers "what can you do" with a static summary
//! of the fixed tool catalog. Backs the forced-tool heuristic's
//! capability-question bucket so the AI never has to guess at its own scope.

use async_trait::async_trait;

use super::{Tool, ToolResult};

pub struct CapabilityProbeTool;

const SUMMARY: &str = "\
I can read, list, and search files under this room's allowed workspace \
directories; run shell commands in a sandboxed, timeout-bounded executor; \
save this room's chat history to a downloadable file; and create new \
downloadable files from text I write. I cannot browse the web, access \
files outside the configured workspace roots, or run commands that match \
a denylist of destructive patterns.";

#[async_trait]
impl Tool for CapabilityProbeTool {
    fn name(&self) -> &str {
        "capability_probe"
    }

    fn description(&self) -> &str {
        "Describe the tools available to the AI participant and their limits. \
         Use this when asked what you can do."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        ToolResult::success(SUMMARY)
    }
}
