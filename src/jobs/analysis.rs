// Output analysis
// Compares what a job asked for with what the backend reports it wrote.

use serde::{Deserialize, Serialize};

use super::JobOutputs;
use crate::backend::TaskResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOutputAnalysis {
    pub requested: Vec<String>,
    pub produced: Vec<String>,
    pub missing: Vec<String>,
    pub partial: bool,
    pub complete: bool,
}

impl ComponentOutputAnalysis {
    /// `complete` when every requested kind was produced, `partial` when some
    /// but not all were. Nothing produced is neither.
    pub fn compute(outputs: &JobOutputs, result: Option<&TaskResult>) -> Self {
        let requested = outputs.requested();
        let (produced, missing): (Vec<&str>, Vec<&str>) = requested
            .iter()
            .copied()
            .partition(|kind| was_produced(kind, result));

        let complete = missing.is_empty();
        let partial = !missing.is_empty() && missing.len() < requested.len();

        Self {
            requested: requested.iter().map(|s| s.to_string()).collect(),
            produced: produced.iter().map(|s| s.to_string()).collect(),
            missing: missing.iter().map(|s| s.to_string()).collect(),
            partial,
            complete,
        }
    }
}

fn was_produced(kind: &str, result: Option<&TaskResult>) -> bool {
    let Some(result) = result else {
        return false;
    };
    match kind {
        "symbol" => result.symbol_path.as_deref().is_some_and(|p| !p.is_empty()),
        "footprint" => result.footprint_path.as_deref().is_some_and(|p| !p.is_empty()),
        "model" => !result.model_paths.is_empty(),
        _ => false,
    }
}
