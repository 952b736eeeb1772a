//! `router` plugin — evaluates a value against an ordered `routes` map and
//! reports every target reached by a matching route.
//!
//! Route keys are literal strings or `re:<pattern>` regexes; *every*
//! matching route's targets are taken (not just the first). The result is
//! written to stdout as a JSON array of target step names; the walker reads
//! it back (via the node executor's always-on router capture) to decide
//! which downstream steps are eligible versus implicitly `Skipped`.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize)]
struct RouterConfig {
    value: String,
    routes: Vec<(String, Vec<String>)>,
}

pub struct RouterNode;

fn key_matches(key: &str, value: &str) -> bool {
    match key.strip_prefix("re:") {
        Some(pattern) => Regex::new(pattern).map(|re| re.is_match(value)).unwrap_or(false),
        None => key == value,
    }
}

#[async_trait]
impl ExecutableNode for RouterNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        if req.commands.len() > 1 {
            return Err(NodeError::MultiCommandUnsupported);
        }
        let config: RouterConfig = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid router config: {e}")))?;

        let mut matched: Vec<String> = Vec::new();
        for (key, targets) in &config.routes {
            if key_matches(key, &config.value) {
                matched.extend(targets.iter().cloned());
            }
        }

        let payload = serde_json::to_vec(&matched).unwrap_or_default();
        io.stdout.write_all(&payload).await.ok();
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_regex_keys_both_match() {
        assert!(key_matches("ok", "ok"));
        assert!(key_matches("re:^err.*", "error: boom"));
        assert!(!key_matches("ok", "not-ok"));
    }
}
