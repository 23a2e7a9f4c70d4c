//! Classification of ComfyUI processing stages by node identifier.
//!
//! The relay needs to know two things about the node that is currently
//! executing: whether its execution metadata carries a usable step/total
//! pair (the sampler), and whether the binary frames it emits are preview
//! images worth forwarding. Both questions are answered by a
//! [`StagePredicate`], so the heuristic can be swapped without touching the
//! progress state machine.

use std::sync::Arc;

/// Node identifier substring that marks the progress-bearing sampler stage.
pub const DEFAULT_PROGRESS_STAGE: &str = "KSampler";

/// Node identifier of the stage that streams preview images over WebSocket.
pub const DEFAULT_PREVIEW_STAGE: &str = "save_image_websocket_node";

/// Decides whether a node identifier belongs to a particular stage.
pub trait StagePredicate: Send + Sync {
    fn matches(&self, node: &str) -> bool;
}

impl<F> StagePredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, node: &str) -> bool {
        self(node)
    }
}

/// String-based stage matcher configured from the environment.
///
/// An empty pattern never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageMatcher {
    /// The node identifier must equal the pattern.
    Exact(String),
    /// The node identifier must contain the pattern.
    Contains(String),
}

impl StagePredicate for StageMatcher {
    fn matches(&self, node: &str) -> bool {
        match self {
            StageMatcher::Exact(pattern) => !pattern.is_empty() && node == pattern,
            StageMatcher::Contains(pattern) => !pattern.is_empty() && node.contains(pattern.as_str()),
        }
    }
}

/// The pair of predicates the progress monitor consults.
#[derive(Clone)]
pub struct StageConfig {
    /// Stages whose `step`/`steps` metadata drives the progress percentage.
    pub progress: Arc<dyn StagePredicate>,
    /// Stages whose binary frames are forwarded as previews.
    pub preview: Arc<dyn StagePredicate>,
}

impl StageConfig {
    pub fn new(
        progress: impl StagePredicate + 'static,
        preview: impl StagePredicate + 'static,
    ) -> Self {
        Self {
            progress: Arc::new(progress),
            preview: Arc::new(preview),
        }
    }

    pub fn is_progress_stage(&self, node: &str) -> bool {
        self.progress.matches(node)
    }

    pub fn is_preview_stage(&self, node: &str) -> bool {
        self.preview.matches(node)
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::new(
            StageMatcher::Contains(DEFAULT_PROGRESS_STAGE.to_string()),
            StageMatcher::Exact(DEFAULT_PREVIEW_STAGE.to_string()),
        )
    }
}

impl std::fmt::Debug for StageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageConfig").finish_non_exhaustive()
    }
}

/// Percent completion for a step/total pair: `floor(step / total * 100)`,
/// clamped to `[0, 100]`.
///
/// Returns `None` when `total` is zero.
pub fn step_percent(step: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let percent = u128::from(step.min(total)) * 100 / u128::from(total);
    u8::try_from(percent).ok()
}
