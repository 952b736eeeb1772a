//! Thin YAML -> `Dag` loader.
//!
//! Full YAML grammar/validation is explicitly out of scope (spec.md §1);
//! this only round-trips the `Dag`/`Step` structs well enough for the CLI's
//! `validate`/`run` commands, and resolves the one piece of multi-document
//! semantics spec.md calls out: a `---`-separated document stream defines a
//! parent DAG plus inline sub-DAGs, keyed by `name`.

use std::collections::HashMap;

use crate::models::Dag;
use crate::EngineError;

/// A parent DAG plus every inline sub-DAG declared alongside it in the same
/// multi-document YAML stream, keyed by DAG name.
#[derive(Debug, Clone)]
pub struct DagSet {
    pub parent: Dag,
    pub children: HashMap<String, Dag>,
}

impl DagSet {
    pub fn get(&self, name: &str) -> Option<&Dag> {
        if self.parent.name == name {
            Some(&self.parent)
        } else {
            self.children.get(name)
        }
    }
}

/// Parse a single-document YAML workflow spec into a `Dag`.
pub fn load_dag_str(yaml: &str) -> Result<Dag, EngineError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Parse a `---`-separated multi-document YAML stream. The first document
/// is the parent DAG; every subsequent document is an inline sub-DAG.
///
/// Open Question (spec.md §9): if the parent and an inline sub-DAG share a
/// name, this is rejected as `DuplicateDagName` rather than silently
/// picking one — see DESIGN.md.
pub fn load_dag_set_str(yaml: &str) -> Result<DagSet, EngineError> {
    let mut docs = serde_yaml::Deserializer::from_str(yaml);
    let mut dags = Vec::new();
    for doc in &mut docs {
        let dag = Dag::deserialize(doc)?;
        dags.push(dag);
    }

    let mut iter = dags.into_iter();
    let parent = iter.next().ok_or(EngineError::EmptySpec)?;

    let mut children = HashMap::new();
    for child in iter {
        if child.name == parent.name || children.contains_key(&child.name) {
            return Err(EngineError::DuplicateDagName(child.name));
        }
        children.insert(child.name.clone(), child);
    }

    Ok(DagSet { parent, children })
}

// `serde_yaml::Deserializer` yields `serde_yaml::Value`-backed documents;
// `Dag::deserialize` needs the trait in scope.
use serde::Deserialize;

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &str = r#"
name: simple
steps:
  - name: a
    command: "echo 1"
"#;

    #[test]
    fn loads_single_document() {
        let dag = load_dag_str(SINGLE).unwrap();
        assert_eq!(dag.name, "simple");
        assert_eq!(dag.steps.len(), 1);
    }

    const MULTI: &str = r#"
name: parent
steps:
  - name: a
    call:
      dag: child
---
name: child
steps:
  - name: b
    command: "echo hi"
"#;

    #[test]
    fn loads_multi_document_parent_and_child() {
        let set = load_dag_set_str(MULTI).unwrap();
        assert_eq!(set.parent.name, "parent");
        assert!(set.get("child").is_some());
    }

    const DUPLICATE: &str = r#"
name: dup
steps: []
---
name: dup
steps: []
"#;

    #[test]
    fn rejects_duplicate_names_across_documents() {
        let err = load_dag_set_str(DUPLICATE).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateDagName(name) if name == "dup"));
    }

    #[test]
    fn abort_is_an_alias_for_cancel_handler() {
        let yaml = r#"
name: d
handlerOn:
  abort:
    name: onAbort
    command: "echo aborted"
steps: []
"#;
        let dag = load_dag_str(yaml).unwrap();
        assert!(dag.handler_on.cancel.is_some());
    }
}
