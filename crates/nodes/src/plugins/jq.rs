//! `jq` plugin — evaluates a jq filter (`script`) over the JSON value named
//! in `config.input`. Single command only; `raw: bool` unquotes a single
//! string result instead of JSON-encoding it.

use async_trait::async_trait;
use jaq_interpret::{Ctx, FilterT, ParseCtx, RcIter, Val};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize, Default)]
struct JqConfig {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    raw: bool,
}

pub struct JqNode;

#[async_trait]
impl ExecutableNode for JqNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        if req.commands.len() > 1 {
            return Err(NodeError::MultiCommandUnsupported);
        }
        let filter_src = req
            .script
            .as_deref()
            .or_else(|| req.commands.first().map(|s| s.as_str()))
            .ok_or_else(|| NodeError::Execution("jq step requires a script".into()))?;
        let config: JqConfig = serde_json::from_value(req.config.clone()).unwrap_or_default();

        let mut ctx = ParseCtx::new(Vec::new());
        ctx.insert_natives(jaq_core::core());
        ctx.insert_defs(jaq_std::std());

        let (parsed, errs) = jaq_parse::parse(filter_src, jaq_parse::main());
        if !errs.is_empty() {
            return Err(NodeError::Execution(format!("jq parse error: {errs:?}")));
        }
        let filter = ctx.compile(parsed.ok_or_else(|| NodeError::Execution("empty jq filter".into()))?);

        let inputs = RcIter::new(core::iter::empty());
        let input_val = Val::from(config.input);
        let mut out = Vec::new();
        for result in filter.run((Ctx::new([], &inputs), input_val)) {
            match result {
                Ok(v) => {
                    let json: Value = v.into();
                    let rendered = if config.raw {
                        match &json {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        }
                    } else {
                        json.to_string()
                    };
                    out.push(rendered);
                }
                Err(e) => return Err(NodeError::Execution(format!("jq runtime error: {e}"))),
            }
        }
        io.stdout.write_all(out.join("\n").as_bytes()).await.ok();
        Ok(0)
    }
}
