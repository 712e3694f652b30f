//! Model classifiers: the built-in model table, result interpreters and the
//! job that drives a model over its queue.

pub mod classifier;
pub mod interpret;
pub mod job;
pub mod registry;

pub use classifier::{Classifier, ClassifyOutcome};
pub use interpret::{
    FaceInterpreter, FaceResult, LandmarkInterpreter, Prepared, ResultInterpreter, TagInterpreter,
};
pub use job::{ClassificationJob, RunReport};
pub use registry::{model_spec, ModelSpec, TimeoutTable, MODELS};

use lumen_worker::{CancellationToken, ClassifierRunner, RunnerConfig};

use crate::config::LumenConfig;
use crate::context::Collaborators;
use crate::error::{LumenError, Result};

/// Build the classifier for `model` as configured.
pub fn build_classifier(
    model: &str,
    config: &LumenConfig,
    stores: &Collaborators,
    cancel: CancellationToken,
) -> Result<Classifier> {
    let spec = model_spec(model).ok_or_else(|| LumenError::UnknownModel(model.to_string()))?;

    let interpreter: Box<dyn ResultInterpreter> = match spec.name {
        registry::FACES => Box::new(FaceInterpreter::new(
            stores.detections.clone(),
            stores.access.clone(),
            config.faces.min_score,
        )),
        registry::LANDMARKS => Box::new(LandmarkInterpreter::new(
            stores.tags.clone(),
            config.landmarks.skip_tags.iter().cloned(),
        )),
        _ => Box::new(TagInterpreter::new(stores.tags.clone())),
    };

    let runner = ClassifierRunner::new(
        RunnerConfig::new(&config.runtime, config.script_for(spec))
            .with_mode(config.execution_mode()),
        stores.files.clone(),
        stores.queue.clone(),
    )
    .with_cancel(cancel);

    Ok(Classifier::new(
        spec,
        runner,
        interpreter,
        stores.queue.clone(),
        config.timeout_for(spec),
    ))
}

pub fn build_job(
    model: &str,
    config: &LumenConfig,
    stores: &Collaborators,
    cancel: CancellationToken,
) -> Result<ClassificationJob> {
    let classifier = build_classifier(model, config, stores, cancel)?;
    let batch_size = config.batch_size_for(classifier.spec());
    Ok(ClassificationJob::new(
        classifier,
        stores.queue.clone(),
        batch_size,
    ))
}
