//! The unit of work a tick runs.
//!
//! Stages are registered with the orchestrator in a fixed order. Each one
//! receives the world record and the tick prompt. A stage that returns an
//! error or panics is recorded in the audit log; the tick carries on with
//! the next stage.

use erbe_delta::PatchFailure;
use erbe_world::WorldError;
use erbe_world::WorldRecord;

/// A failure reported by a stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// One or more queued patch batches were rejected.
    #[error("{} patch batch(es) rejected; first: batch {}: {}", .failures.len(), first_batch(.failures), first_error(.failures))]
    PatchBatches {
        /// Queue position of each rejected batch and why it failed.
        failures: Vec<(usize, PatchFailure)>,
    },

    /// A world operation failed.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: WorldError,
    },

    /// Any other failure.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl StageError {
    /// A failure described by `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

fn first_batch(failures: &[(usize, PatchFailure)]) -> usize {
    failures.first().map_or(0, |(batch, _)| *batch)
}

fn first_error(failures: &[(usize, PatchFailure)]) -> String {
    failures
        .first()
        .map_or_else(String::new, |(_, failure)| failure.to_string())
}

/// One step of the tick pipeline.
pub trait Stage: Send {
    /// Name used in logs and audit entries.
    fn name(&self) -> &str;

    /// Advance `record`. `prompt` is the tick's free-text prompt, passed
    /// through unmodified.
    fn run(&mut self, record: &mut WorldRecord, prompt: Option<&str>) -> Result<(), StageError>;
}

/// A stage built from a name and a closure.
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: FnMut(&mut WorldRecord, Option<&str>) -> Result<(), StageError> + Send,
{
    /// Wrap `f` as a stage called `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Stage for FnStage<F>
where
    F: FnMut(&mut WorldRecord, Option<&str>) -> Result<(), StageError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, record: &mut WorldRecord, prompt: Option<&str>) -> Result<(), StageError> {
        (self.f)(record, prompt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use erbe_types::{Path, PatchOp, Value};
    use erbe_world::default_record;

    #[test]
    fn fn_stage_forwards_prompt() {
        let mut stage = FnStage::new("echo", |record: &mut WorldRecord, prompt: Option<&str>| {
            record.set("echo", prompt.unwrap_or_default());
            Ok(())
        });
        let mut record = default_record();
        stage.run(&mut record, Some("hello")).unwrap();
        assert_eq!(stage.name(), "echo");
        assert_eq!(record.get("echo").and_then(Value::as_str), Some("hello"));
    }

    #[test]
    fn patch_batch_error_names_first_failure() {
        let mut tree = Value::empty_map();
        let failure = erbe_delta::apply_patch(&mut tree, &[PatchOp::remove(Path::root().key("ghost"), Value::Null)]).unwrap_err();
        let err = StageError::PatchBatches {
            failures: vec![(2, failure)],
        };
        let text = err.to_string();
        assert!(text.starts_with("1 patch batch(es) rejected; first: batch 2:"), "{text}");
    }
}
