//! `redis` plugin — runs one Redis command, or a `pipeline` of commands,
//! and reports the JSON-encoded result.

use async_trait::async_trait;
use redis::Value as RedisValue;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize, Default)]
struct RedisConfig {
    url: String,
    #[serde(default)]
    pipeline: Vec<Vec<String>>,
}

pub struct RedisNode;

fn redis_to_json(value: RedisValue) -> Value {
    match value {
        RedisValue::Nil => Value::Null,
        RedisValue::Int(i) => Value::Number(i.into()),
        RedisValue::Data(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        RedisValue::Bulk(items) => Value::Array(items.into_iter().map(redis_to_json).collect()),
        RedisValue::Okay => Value::String("OK".into()),
        RedisValue::Status(s) => Value::String(s),
    }
}

#[async_trait]
impl ExecutableNode for RedisNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let config: RedisConfig = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid redis config: {e}")))?;

        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| NodeError::Execution(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| NodeError::Execution(e.to_string()))?;

        let commands: Vec<Vec<String>> = if !config.pipeline.is_empty() {
            config.pipeline
        } else if let Some(single) = req.commands.first() {
            vec![shell_words::split(single).map_err(|e| NodeError::Execution(e.to_string()))?]
        } else {
            return Err(NodeError::Execution("redis step requires a command or pipeline".into()));
        };

        let mut pipe = redis::pipe();
        for args in &commands {
            let Some((cmd, rest)) = args.split_first() else { continue };
            pipe.cmd(cmd).arg(rest);
        }

        let results: Vec<RedisValue> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| NodeError::Execution(e.to_string()))?;

        let rendered = if results.len() == 1 {
            redis_to_json(results.into_iter().next().unwrap())
        } else {
            Value::Array(results.into_iter().map(redis_to_json).collect())
        };

        io.stdout.write_all(rendered.to_string().as_bytes()).await.ok();
        Ok(0)
    }
}
