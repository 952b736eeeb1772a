//! String-template expansion for command/script/env/workdir/precondition
//! fields.
//!
//! A single pass resolves, in order: `${var:start:len}` substring forms,
//! `${id.stdout|stderr|exitCode}` step references, plain `${var}` lookups
//! against the layered environment, and finally backtick `` `cmd` ``
//! command-substitution. `\$` is preserved as a literal `$` without being
//! handed to a shell. Unknown step-reference tokens (an id/field pair that
//! doesn't resolve) are left untouched so downstream tooling can
//! distinguish "no value yet" from "empty value".

use std::collections::HashMap;
use std::process::Command;

use regex::Regex;

use crate::models::{Node, OutputValue};

/// Everything a template expansion pass can see: the layered env (already
/// flattened to a single map) plus completed upstream nodes for step-ref
/// lookups.
pub struct TemplateContext<'a> {
    pub env: &'a HashMap<String, String>,
    pub nodes_by_ref: HashMap<&'a str, &'a Node>,
}

impl<'a> TemplateContext<'a> {
    pub fn new(env: &'a HashMap<String, String>, completed: &'a [Node]) -> Self {
        let nodes_by_ref = completed.iter().map(|n| (n.step.ref_key(), n)).collect();
        Self { env, nodes_by_ref }
    }
}

/// Expand all template forms in `input`. Shell-invoking backtick
/// substitution is run synchronously and is therefore blocking; callers
/// expand templates off the async executor hot path (node setup, before
/// `Run` is invoked).
pub fn expand(input: &str, ctx: &TemplateContext) -> String {
    let escaped = protect_escaped_dollar(input);
    let after_refs = expand_step_refs(&escaped, ctx);
    let after_vars = expand_vars(&after_refs, ctx);
    let after_subshell = expand_backticks(&after_vars);
    restore_escaped_dollar(&after_subshell)
}

const ESCAPE_SENTINEL: &str = "\u{0}DOLLAR\u{0}";

fn protect_escaped_dollar(input: &str) -> String {
    input.replace("\\$", ESCAPE_SENTINEL)
}

fn restore_escaped_dollar(input: &str) -> String {
    input.replace(ESCAPE_SENTINEL, "$")
}

/// `${var:start:len}` substring form and plain `${var}` lookups against the
/// flattened environment map.
fn expand_vars(input: &str, ctx: &TemplateContext) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::(-?\d+):(\d+))?\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        let Some(value) = ctx.env.get(name) else {
            return caps[0].to_string();
        };
        match (caps.get(2), caps.get(3)) {
            (Some(start), Some(len)) => {
                let start: i64 = start.as_str().parse().unwrap_or(0);
                let len: usize = len.as_str().parse().unwrap_or(0);
                substring(value, start, len)
            }
            _ => value.clone(),
        }
    })
    .into_owned()
}

fn substring(value: &str, start: i64, len: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    let n = chars.len() as i64;
    let start_idx = if start < 0 { (n + start).max(0) } else { start.min(n) };
    let end_idx = (start_idx + len as i64).min(n);
    if start_idx >= end_idx {
        return String::new();
    }
    chars[start_idx as usize..end_idx as usize].iter().collect()
}

/// `${id.stdout|stderr|exitCode}` and `${id.jsonField}` (output-variable
/// lookup) cross-step references. Left untouched if the id or field isn't
/// resolvable yet.
fn expand_step_refs(input: &str, ctx: &TemplateContext) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_\-]*)\.([A-Za-z_][A-Za-z0-9_.]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let id = &caps[1];
        let field = &caps[2];
        let Some(node) = ctx.nodes_by_ref.get(id) else {
            return caps[0].to_string();
        };
        let resolved = match field {
            "stdout" => node.stdout_path.as_deref().and_then(read_captured),
            "stderr" => node.stderr_path.as_deref().and_then(read_captured),
            "exitCode" => node.exit_code.map(|c| c.to_string()),
            other => resolve_output_field(node, other),
        };
        resolved.unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// `${id.stdout}`/`${id.stderr}` resolve to the attempt's captured output,
/// not the log file path (that's what `DAG_RUN_STEP_STDOUT_FILE` is for) —
/// read and trim it from the node's recorded log path.
fn read_captured(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|s| s.trim_end().to_string())
}

fn resolve_output_field(node: &Node, field: &str) -> Option<String> {
    let mut parts = field.splitn(2, '.');
    let var_name = parts.next()?;
    let value: &OutputValue = node.output_variables.get(var_name)?;
    match parts.next() {
        Some(rest) => value.lookup(rest),
        None => Some(value.as_text()),
    }
}

/// Backtick command substitution: `` `cmd` `` -> trimmed stdout of `cmd`.
/// Failures leave the backtick expression untouched.
fn expand_backticks(input: &str) -> String {
    let re = Regex::new(r"`([^`]*)`").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let cmd = &caps[1];
        match Command::new("sh").arg("-c").arg(cmd).output() {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim_end().to_string()
            }
            _ => caps[0].to_string(),
        }
    })
    .into_owned()
}

/// Shared matching rule for preconditions, `continueOn.output`, and repeat
/// conditions: literal equality, or regex when prefixed with `re:`.
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_prefix("re:") {
        Some(re) => Regex::new(re).map(|re| re.is_match(value)).unwrap_or(false),
        None => pattern == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(env: &HashMap<String, String>) -> TemplateContext {
        TemplateContext { env, nodes_by_ref: HashMap::new() }
    }

    #[test]
    fn expands_plain_var() {
        let mut env = HashMap::new();
        env.insert("OUT1".to_string(), "1".to_string());
        assert_eq!(expand("echo ${OUT1}=1", &ctx(&env)), "echo 1=1");
    }

    #[test]
    fn leaves_unknown_var_literal() {
        let env = HashMap::new();
        assert_eq!(expand("echo ${MISSING}", &ctx(&env)), "echo ${MISSING}");
    }

    #[test]
    fn substring_form() {
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "hello world".to_string());
        assert_eq!(expand("${GREETING:0:5}", &ctx(&env)), "hello");
        assert_eq!(expand("${GREETING:-5:5}", &ctx(&env)), "world");
    }

    #[test]
    fn preserves_escaped_dollar() {
        let env = HashMap::new();
        assert_eq!(expand(r"price is \$5", &ctx(&env)), "price is $5");
    }

    #[test]
    fn step_ref_exit_code_and_stdout() {
        use crate::models::Step;
        let step = Step {
            name: "a".into(),
            id: Some("a".into()),
            step_type: "command".into(),
            command: None,
            script: None,
            args: vec![],
            dir: None,
            shell: None,
            env: vec![],
            output: None,
            stdout: None,
            stderr: None,
            depends: vec![],
            preconditions: vec![],
            retry_policy: None,
            repeat_policy: None,
            continue_on: None,
            timeout_sec: None,
            signal_on_stop: None,
            routes: vec![],
            call: None,
            parallel: None,
            container: None,
            config: serde_json::Value::Null,
        };
        let mut node = Node::new(step);
        node.exit_code = Some(0);
        let log = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(log.path(), "hello\n").unwrap();
        node.stdout_path = Some(log.path().to_string_lossy().into_owned());
        let nodes = vec![node];
        let env = HashMap::new();
        let tctx = TemplateContext::new(&env, &nodes);
        assert_eq!(expand("${a.exitCode}", &tctx), "0");
        assert_eq!(expand("${a.stdout}", &tctx), "hello");
    }
}
