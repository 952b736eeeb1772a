//! `http` plugin — builds and sends one HTTP request from `command`
//! (`METHOD url`) and `config {headers, body, silent, timeout}`. Single
//! command only.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize, Default)]
struct HttpConfig {
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    silent: bool,
    #[serde(default)]
    timeout_sec: Option<u64>,
}

pub struct HttpNode;

#[async_trait]
impl ExecutableNode for HttpNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        if req.commands.len() > 1 {
            return Err(NodeError::MultiCommandUnsupported);
        }
        let command = req
            .commands
            .first()
            .ok_or_else(|| NodeError::Execution("http step requires a command".into()))?;
        let mut parts = command.splitn(2, ' ');
        let method = parts.next().unwrap_or("GET");
        let url = parts
            .next()
            .ok_or_else(|| NodeError::Execution("http command must be 'METHOD url'".into()))?;

        let config: HttpConfig = serde_json::from_value(req.config.clone()).unwrap_or_default();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec.unwrap_or(30)))
            .build()
            .map_err(|e| NodeError::Execution(e.to_string()))?;

        let method: reqwest::Method = method
            .parse()
            .map_err(|_| NodeError::Execution(format!("unsupported HTTP method: {method}")))?;
        let mut builder = client.request(method, url);
        for (k, v) in &config.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &config.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| NodeError::Execution(e.to_string()))?;
        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();

        if !config.silent {
            io.stdout.write_all(body_text.as_bytes()).await.ok();
        }
        Ok(if status.is_success() { 0 } else { status.as_u16() as i32 })
    }
}
