//! Built-in models.

use std::time::Duration;

use lumen_worker::ExecutionMode;

use crate::modality::Modality;

/// Per-file time budget, depending on whether native acceleration is
/// available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutTable {
    pub accelerated: Duration,
    pub pure_software: Duration,
}

impl TimeoutTable {
    pub fn for_mode(&self, mode: &ExecutionMode) -> Duration {
        if mode.pure_software {
            self.pure_software
        } else {
            self.accelerated
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub modality: Modality,
    pub timeouts: TimeoutTable,
    /// Files per process invocation
    pub batch_size: usize,
    /// Script file name below the models directory
    pub script: &'static str,
}

const fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub const IMAGENET: &str = "imagenet";
pub const LANDMARKS: &str = "landmarks";
pub const FACES: &str = "faces";
pub const MUSICNN: &str = "musicnn";
pub const MOVINET: &str = "movinet";

pub static MODELS: [ModelSpec; 5] = [
    ModelSpec {
        name: IMAGENET,
        modality: Modality::Image,
        timeouts: TimeoutTable {
            accelerated: secs(120),
            pure_software: secs(480),
        },
        batch_size: 100,
        script: "imagenet.py",
    },
    ModelSpec {
        name: LANDMARKS,
        modality: Modality::Image,
        timeouts: TimeoutTable {
            accelerated: secs(120),
            pure_software: secs(480),
        },
        batch_size: 100,
        script: "landmarks.py",
    },
    ModelSpec {
        name: FACES,
        modality: Modality::Image,
        timeouts: TimeoutTable {
            accelerated: secs(120),
            pure_software: secs(360),
        },
        batch_size: 50,
        script: "faces.py",
    },
    ModelSpec {
        name: MUSICNN,
        modality: Modality::Audio,
        timeouts: TimeoutTable {
            accelerated: secs(60),
            pure_software: secs(240),
        },
        batch_size: 20,
        script: "musicnn.py",
    },
    ModelSpec {
        name: MOVINET,
        modality: Modality::Video,
        timeouts: TimeoutTable {
            accelerated: secs(600),
            pure_software: secs(1800),
        },
        batch_size: 5,
        script: "movinet.py",
    },
];

pub fn model_spec(name: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|m| m.name == name)
}

pub fn models_for(modality: Modality) -> impl Iterator<Item = &'static ModelSpec> {
    MODELS.iter().filter(move |m| m.modality == modality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(model_spec("faces").map(|m| m.modality), Some(Modality::Image));
        assert!(model_spec("resnet").is_none());
        let image: Vec<&str> = models_for(Modality::Image).map(|m| m.name).collect();
        assert_eq!(image, vec![IMAGENET, LANDMARKS, FACES]);
    }

    #[test]
    fn test_timeout_follows_mode() {
        let spec = model_spec(MUSICNN).unwrap();
        let soft = ExecutionMode {
            pure_software: true,
            ..ExecutionMode::default()
        };
        assert_eq!(spec.timeouts.for_mode(&soft), secs(240));
        assert_eq!(spec.timeouts.for_mode(&ExecutionMode::default()), secs(60));
    }
}
