//! `sql` plugin (sqlite) — executes a SQL script, optionally inside a
//! transaction committed on success and rolled back on failure, and renders
//! the final statement's rows as `jsonl`, `json`, or `csv`.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::{types::Value as SqlValue, Connection};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::traits::{ExecutableNode, ExecutionContext, NodeIo, StepRequest};
use crate::NodeError;

#[derive(Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum OutputFormat {
    #[default]
    Jsonl,
    Json,
    Csv,
}

#[derive(Deserialize)]
struct SqlConfig {
    database: String,
    #[serde(default)]
    transaction: bool,
    #[serde(default)]
    output_format: OutputFormat,
    #[serde(default)]
    max_rows: Option<usize>,
    #[serde(default)]
    params: HashMap<String, Value>,
}

pub struct SqlNode;

fn to_sql_value(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) if n.is_i64() => SqlValue::Integer(n.as_i64().unwrap()),
        Value::Number(n) => SqlValue::Real(n.as_f64().unwrap_or_default()),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn run_blocking(config: SqlConfig, script: String) -> Result<String, NodeError> {
    let mut conn =
        Connection::open(&config.database).map_err(|e| NodeError::Execution(e.to_string()))?;

    let params: Vec<(String, SqlValue)> = config
        .params
        .iter()
        .map(|(k, v)| (format!(":{k}"), to_sql_value(v)))
        .collect();
    let bind: Vec<(&str, &dyn rusqlite::ToSql)> =
        params.iter().map(|(k, v)| (k.as_str(), v as &dyn rusqlite::ToSql)).collect();

    let statements: Vec<&str> = script.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    if statements.is_empty() {
        return Ok(String::new());
    }

    let tx = if config.transaction { Some(conn.transaction().map_err(|e| NodeError::Execution(e.to_string()))?) } else { None };
    let run_result = (|| -> Result<String, NodeError> {
        let (last, rest) = statements.split_last().expect("non-empty");
        for stmt in rest {
            tx.as_deref().unwrap_or(&conn)
                .execute(stmt, bind.as_slice())
                .map_err(|e| NodeError::Execution(e.to_string()))?;
        }
        render_rows(tx.as_deref().unwrap_or(&conn), last, &bind, &config)
    })();

    match (run_result, tx) {
        (Ok(rendered), Some(tx)) => {
            tx.commit().map_err(|e| NodeError::Execution(e.to_string()))?;
            Ok(rendered)
        }
        (Ok(rendered), None) => Ok(rendered),
        (Err(e), Some(tx)) => {
            tx.rollback().ok();
            Err(e)
        }
        (Err(e), None) => Err(e),
    }
}

fn render_rows(
    conn: &Connection,
    stmt: &str,
    bind: &[(&str, &dyn rusqlite::ToSql)],
    config: &SqlConfig,
) -> Result<String, NodeError> {
    let mut prepared = conn.prepare(stmt).map_err(|e| NodeError::Execution(e.to_string()))?;
    let column_names: Vec<String> = prepared.column_names().iter().map(|s| s.to_string()).collect();
    if column_names.is_empty() {
        prepared.execute(bind).map_err(|e| NodeError::Execution(e.to_string()))?;
        return Ok(String::new());
    }

    let mut rows_json: Vec<Value> = Vec::new();
    let mut rows = prepared.query(bind).map_err(|e| NodeError::Execution(e.to_string()))?;
    while let Some(row) = rows.next().map_err(|e| NodeError::Execution(e.to_string()))? {
        if let Some(max) = config.max_rows {
            if rows_json.len() >= max {
                break;
            }
        }
        let mut obj = serde_json::Map::new();
        for (i, name) in column_names.iter().enumerate() {
            let value: SqlValue = row.get(i).map_err(|e| NodeError::Execution(e.to_string()))?;
            obj.insert(name.clone(), sql_value_to_json(value));
        }
        rows_json.push(Value::Object(obj));
    }

    Ok(match config.output_format {
        OutputFormat::Json => serde_json::to_string(&rows_json).unwrap_or_default(),
        OutputFormat::Jsonl => rows_json.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("\n"),
        OutputFormat::Csv => {
            let mut out = column_names.join(",") + "\n";
            for row in &rows_json {
                if let Some(obj) = row.as_object() {
                    let line: Vec<String> = column_names.iter().map(|c| obj.get(c).map(|v| v.to_string()).unwrap_or_default()).collect();
                    out.push_str(&line.join(","));
                    out.push('\n');
                }
            }
            out
        }
    })
}

fn sql_value_to_json(v: SqlValue) -> Value {
    match v {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Number(i.into()),
        SqlValue::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

#[async_trait]
impl ExecutableNode for SqlNode {
    async fn run(
        &self,
        _ctx: &ExecutionContext,
        req: &StepRequest,
        io: &mut NodeIo,
    ) -> Result<i32, NodeError> {
        let config: SqlConfig = serde_json::from_value(req.config.clone())
            .map_err(|e| NodeError::Execution(format!("invalid sql config: {e}")))?;
        let script = req
            .script
            .clone()
            .or_else(|| req.commands.first().cloned())
            .ok_or_else(|| NodeError::Execution("sql step requires a script".into()))?;

        let rendered = tokio::task::spawn_blocking(move || run_blocking(config, script))
            .await
            .map_err(|e| NodeError::Execution(e.to_string()))??;

        io.stdout.write_all(rendered.as_bytes()).await.ok();
        Ok(0)
    }
}
