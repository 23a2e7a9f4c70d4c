//! Extraction of job outputs from ComfyUI history records.
//!
//! `GET /history/{prompt_id}` returns `{ "<prompt_id>": { "prompt": ...,
//! "outputs": { "<node_id>": { "images": [...] } } } }`. The recorded
//! `prompt` is either the node graph itself or ComfyUI's
//! `[number, prompt_id, graph, extra_data, outputs_to_execute]` array.

use serde_json::Value;

/// One image listed in a node's outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputImage {
    pub filename: String,
    pub subfolder: String,
    /// Folder type (`output`, `temp`, ...).
    pub kind: String,
}

/// Everything the relay reports about a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutputs {
    /// Seed recorded on the seed node, if present.
    pub seed: Option<u64>,
    /// Output images across all nodes, in the order the backend lists
    /// the nodes.
    pub images: Vec<OutputImage>,
}

/// Pull the seed and every output image for `prompt_id` out of a history
/// response.
///
/// A history without an entry for `prompt_id` yields empty outputs.
pub fn extract_outputs(history: &Value, prompt_id: &str, seed_node: &str) -> JobOutputs {
    let Some(entry) = history.get(prompt_id) else {
        return JobOutputs::default();
    };

    JobOutputs {
        seed: recorded_seed(entry, seed_node),
        images: output_images(entry),
    }
}

fn recorded_seed(entry: &Value, seed_node: &str) -> Option<u64> {
    let prompt = entry.get("prompt")?;
    let graph = match prompt {
        Value::Array(items) => items.get(2)?,
        other => other,
    };
    graph.get(seed_node)?.get("inputs")?.get("seed")?.as_u64()
}

fn output_images(entry: &Value) -> Vec<OutputImage> {
    let Some(outputs) = entry.get("outputs").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut images = Vec::new();
    for (node_id, output) in outputs {
        let Some(listed) = output.get("images").and_then(Value::as_array) else {
            tracing::trace!(node_id = %node_id, "Node produced no images");
            continue;
        };
        for image in listed {
            let Some(filename) = image.get("filename").and_then(Value::as_str) else {
                continue;
            };
            images.push(OutputImage {
                filename: filename.to_string(),
                subfolder: image
                    .get("subfolder")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                kind: image
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("output")
                    .to_string(),
            });
        }
    }
    images
}
