//! Workflow templates and submission payload preparation.
//!
//! Templates are ComfyUI API-format graphs stored as
//! `{dir}/{name}.json`: a JSON object keyed by node id, each node carrying
//! an `inputs` object. Preparing a template for submission writes the
//! prompt text into the prompt node and a seed into the seed node.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Template used when a request does not name one.
pub const DEFAULT_WORKFLOW: &str = "0404test";

/// Node id whose `inputs.text` receives the prompt.
pub const DEFAULT_PROMPT_NODE: &str = "4";

/// Node id whose `inputs.seed` receives the seed.
pub const DEFAULT_SEED_NODE: &str = "11";

/// Upper bound (inclusive) for randomly generated seeds.
pub const MAX_RANDOM_SEED: u64 = 9_999_999_999;

/// Which template nodes receive the prompt text and the seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowBindings {
    pub prompt_node: String,
    pub seed_node: String,
}

impl Default for WorkflowBindings {
    fn default() -> Self {
        Self {
            prompt_node: DEFAULT_PROMPT_NODE.to_string(),
            seed_node: DEFAULT_SEED_NODE.to_string(),
        }
    }
}

/// A template ready for `POST /prompt`.
#[derive(Debug, Clone)]
pub struct PreparedWorkflow {
    pub graph: Value,
    /// The seed written into the graph (explicit or generated).
    pub seed: u64,
}

/// Directory-backed store of workflow templates.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    dir: PathBuf,
    bindings: WorkflowBindings,
}

impl WorkflowStore {
    pub fn new(dir: impl Into<PathBuf>, bindings: WorkflowBindings) -> Self {
        Self {
            dir: dir.into(),
            bindings,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bindings(&self) -> &WorkflowBindings {
        &self.bindings
    }

    /// Create the template directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Read and parse the template called `name`.
    pub async fn load(&self, name: &str) -> Result<Value, CoreError> {
        validate_workflow_name(name)?;
        let path = self.dir.join(format!("{name}.json"));

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::NotFound {
                    entity: "Workflow",
                    id: name.to_string(),
                });
            }
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "Failed to read workflow '{name}': {e}"
                )));
            }
        };

        let graph: Value = serde_json::from_str(&raw).map_err(|e| {
            CoreError::Internal(format!("Workflow '{name}' is not valid JSON: {e}"))
        })?;
        if !graph.is_object() {
            return Err(CoreError::Validation(format!(
                "Workflow '{name}' must be a JSON object keyed by node id"
            )));
        }
        Ok(graph)
    }

    /// Load `name` and bind the prompt text and seed into it.
    ///
    /// When `seed` is `None` a random seed in `[1, MAX_RANDOM_SEED]` is used.
    pub async fn prepare(
        &self,
        name: &str,
        prompt_text: &str,
        seed: Option<u64>,
    ) -> Result<PreparedWorkflow, CoreError> {
        let graph = self.load(name).await?;
        bind_inputs(graph, &self.bindings, prompt_text, seed)
    }
}

/// Write the prompt text and seed into an already-loaded graph.
pub fn bind_inputs(
    mut graph: Value,
    bindings: &WorkflowBindings,
    prompt_text: &str,
    seed: Option<u64>,
) -> Result<PreparedWorkflow, CoreError> {
    let seed = seed.unwrap_or_else(random_seed);

    node_inputs_mut(&mut graph, &bindings.prompt_node)?
        .insert("text".to_string(), Value::String(prompt_text.to_string()));
    node_inputs_mut(&mut graph, &bindings.seed_node)?
        .insert("seed".to_string(), Value::from(seed));

    Ok(PreparedWorkflow { graph, seed })
}

/// A random seed in `[1, MAX_RANDOM_SEED]`.
pub fn random_seed() -> u64 {
    rand::rng().random_range(1..=MAX_RANDOM_SEED)
}

/// Reject names that could escape the template directory.
pub fn validate_workflow_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation("Workflow name must not be empty".into()));
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(CoreError::Validation(format!(
            "Invalid workflow name '{name}'"
        )));
    }
    Ok(())
}

fn node_inputs_mut<'a>(
    graph: &'a mut Value,
    node_id: &str,
) -> Result<&'a mut Map<String, Value>, CoreError> {
    graph
        .get_mut(node_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            CoreError::Validation(format!("Workflow has no node '{node_id}' with inputs"))
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn template() -> Value {
        json!({
            "4": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["1", 0]}},
            "11": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 20}},
            "12": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}}
        })
    }

    fn store_with(name: &str, body: &str) -> (tempfile::TempDir, WorkflowStore) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{name}.json")), body).unwrap();
        let store = WorkflowStore::new(dir.path(), WorkflowBindings::default());
        (dir, store)
    }

    #[tokio::test]
    async fn explicit_seed_is_written_verbatim() {
        let (_dir, store) = store_with("0404test", &template().to_string());

        let prepared = store
            .prepare("0404test", "a red fox", Some(42))
            .await
            .unwrap();

        assert_eq!(prepared.seed, 42);
        assert_eq!(prepared.graph["11"]["inputs"]["seed"], 42);
        assert_eq!(prepared.graph["4"]["inputs"]["text"], "a red fox");
        assert_eq!(prepared.graph["11"]["inputs"]["steps"], 20);
    }

    #[test]
    fn missing_seed_is_generated_in_range() {
        let prepared = bind_inputs(template(), &WorkflowBindings::default(), "p", None).unwrap();

        assert!((1..=MAX_RANDOM_SEED).contains(&prepared.seed));
        assert_eq!(prepared.graph["11"]["inputs"]["seed"], prepared.seed);
    }

    #[tokio::test]
    async fn missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkflowStore::new(dir.path(), WorkflowBindings::default());

        assert_matches!(
            store.load("nope").await,
            Err(CoreError::NotFound { entity: "Workflow", ref id }) if id == "nope"
        );
    }

    #[tokio::test]
    async fn ensure_dir_creates_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("workflow");
        let store = WorkflowStore::new(nested.clone(), WorkflowBindings::default());

        store.ensure_dir().await.unwrap();
        std::fs::write(nested.join("w.json"), template().to_string()).unwrap();

        let graph = store.load("w").await.unwrap();
        assert_eq!(graph["4"]["class_type"], "CLIPTextEncode");
    }

    #[tokio::test]
    async fn invalid_json_is_internal_error() {
        let (_dir, store) = store_with("broken", "{not json");
        assert_matches!(store.load("broken").await, Err(CoreError::Internal(_)));
    }

    #[tokio::test]
    async fn non_object_template_is_rejected() {
        let (_dir, store) = store_with("list", "[1, 2, 3]");
        assert_matches!(store.load("list").await, Err(CoreError::Validation(_)));
    }

    #[test]
    fn traversal_names_are_rejected() {
        assert_matches!(validate_workflow_name("../secrets"), Err(CoreError::Validation(_)));
        assert_matches!(validate_workflow_name("a/b"), Err(CoreError::Validation(_)));
        assert_matches!(validate_workflow_name("a\\b"), Err(CoreError::Validation(_)));
        assert_matches!(validate_workflow_name(""), Err(CoreError::Validation(_)));
        assert!(validate_workflow_name("0404test").is_ok());
    }

    #[test]
    fn unbound_node_is_a_validation_error() {
        let graph = json!({"4": {"inputs": {}}});
        let result = bind_inputs(graph, &WorkflowBindings::default(), "p", Some(1));
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("'11'"));
    }

    #[test]
    fn custom_bindings_are_honoured() {
        let graph = json!({
            "6": {"inputs": {"text": ""}},
            "3": {"inputs": {"seed": 0}}
        });
        let bindings = WorkflowBindings {
            prompt_node: "6".into(),
            seed_node: "3".into(),
        };
        let prepared = bind_inputs(graph, &bindings, "castle", Some(7)).unwrap();
        assert_eq!(prepared.graph["6"]["inputs"]["text"], "castle");
        assert_eq!(prepared.graph["3"]["inputs"]["seed"], 7);
    }
}
