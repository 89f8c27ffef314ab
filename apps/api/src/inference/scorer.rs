//! Fused multimodal trait model.
//!
//! The model takes three inputs, fed positionally as a batch of one:
//!   0. audio features  (1, 24, 1319, 1)
//!   1. frame stack     (1, k, 128, 128, 3)
//!   2. text embedding  (1, 768)
//! and emits five scalars in `Trait::ALL` order.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ndarray::Axis;
use ort::session::Session;
use ort::value::Tensor;

use super::embedder::{EmbeddingVector, EMBEDDING_DIM};
use super::{onnx_session, ModelError};
use crate::features::audio::{AudioFeatureMatrix, FEATURE_WIDTH, N_MFCC};
use crate::features::image::{ImageStack, CROP};
use crate::personality::TraitVector;

/// Raw fused model: returns its flat output buffer.
pub trait TraitModel: Send + Sync {
    fn predict(
        &self,
        audio: &AudioFeatureMatrix,
        frames: &ImageStack,
        text: &EmbeddingVector,
    ) -> Result<Vec<f32>, ModelError>;
}

pub struct TraitScorer {
    model: Arc<dyn TraitModel>,
    frames: usize,
}

impl TraitScorer {
    pub fn new(model: Arc<dyn TraitModel>, frames: usize) -> Self {
        Self { model, frames }
    }

    pub fn score(
        &self,
        audio: &AudioFeatureMatrix,
        frames: &ImageStack,
        text: &EmbeddingVector,
    ) -> Result<TraitVector, ModelError> {
        if audio.shape() != [N_MFCC, FEATURE_WIDTH, 1] {
            return Err(ModelError::Input(format!(
                "audio features have shape {:?}, expected [{N_MFCC}, {FEATURE_WIDTH}, 1]",
                audio.shape()
            )));
        }
        let crop = CROP as usize;
        if frames.shape() != [self.frames, crop, crop, 3] {
            return Err(ModelError::Input(format!(
                "frame stack has shape {:?}, expected [{}, {crop}, {crop}, 3]",
                frames.shape(),
                self.frames
            )));
        }
        if text.len() != EMBEDDING_DIM {
            return Err(ModelError::Input(format!(
                "text embedding has {} dimensions, expected {EMBEDDING_DIM}",
                text.len()
            )));
        }

        let outputs = self.model.predict(audio, frames, text)?;
        TraitVector::from_model_output(&outputs).map_err(|e| ModelError::Output(e.to_string()))
    }
}

pub struct OnnxTraitModel {
    session: Mutex<Session>,
    input_names: [String; 3],
}

impl OnnxTraitModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let session = onnx_session(path)?;
        let names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let input_names: [String; 3] = names.try_into().map_err(|names: Vec<String>| {
            ModelError::Load(format!(
                "trait model must take 3 inputs (audio, frames, text), found {names:?}"
            ))
        })?;
        Ok(Self {
            session: Mutex::new(session),
            input_names,
        })
    }
}

impl TraitModel for OnnxTraitModel {
    fn predict(
        &self,
        audio: &AudioFeatureMatrix,
        frames: &ImageStack,
        text: &EmbeddingVector,
    ) -> Result<Vec<f32>, ModelError> {
        let input = |e: ort::Error| ModelError::Input(e.to_string());
        let audio = Tensor::from_array(audio.clone().insert_axis(Axis(0))).map_err(input)?;
        let frames = Tensor::from_array(frames.clone().insert_axis(Axis(0))).map_err(input)?;
        let text = Tensor::from_array(text.clone().insert_axis(Axis(0))).map_err(input)?;

        let [audio_name, frames_name, text_name] = &self.input_names;
        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("trait session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![
                audio_name.as_str() => audio,
                frames_name.as_str() => frames,
                text_name.as_str() => text,
            ])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (_, scores) = outputs
            .iter()
            .next()
            .ok_or_else(|| ModelError::Output("trait model produced no output".to_string()))?;
        let (_, data) = scores
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Output(e.to_string()))?;
        Ok(data.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::personality::Trait;
    use ndarray::{Array1, Array3, Array4};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns fixed outputs and counts invocations.
    pub(crate) struct FixedTraitModel {
        pub outputs: Vec<f32>,
        pub calls: AtomicUsize,
    }

    impl FixedTraitModel {
        pub(crate) fn new(outputs: Vec<f32>) -> Self {
            Self {
                outputs,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TraitModel for FixedTraitModel {
        fn predict(
            &self,
            _audio: &AudioFeatureMatrix,
            _frames: &ImageStack,
            _text: &EmbeddingVector,
        ) -> Result<Vec<f32>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outputs.clone())
        }
    }

    fn inputs(k: usize) -> (AudioFeatureMatrix, ImageStack, EmbeddingVector) {
        (
            Array3::zeros((N_MFCC, FEATURE_WIDTH, 1)),
            Array4::zeros((k, 128, 128, 3)),
            Array1::zeros(EMBEDDING_DIM),
        )
    }

    #[test]
    fn test_outputs_map_to_fixed_trait_order() {
        let model = Arc::new(FixedTraitModel::new(vec![0.1, 0.2, 0.3, 0.4, 0.5]));
        let scorer = TraitScorer::new(model, 6);
        let (a, f, t) = inputs(6);
        let v = scorer.score(&a, &f, &t).unwrap();
        let names: Vec<&str> = v.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            names,
            ["extraversion", "neuroticism", "agreeableness", "conscientiousness", "openness"]
        );
        assert!((v.get(Trait::Extraversion) - 0.1).abs() < 1e-6);
        assert!((v.get(Trait::Neuroticism) - 0.2).abs() < 1e-6);
        assert!((v.get(Trait::Agreeableness) - 0.3).abs() < 1e-6);
        assert!((v.get(Trait::Conscientiousness) - 0.4).abs() < 1e-6);
        assert!((v.get(Trait::Openness) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_output_count_rejected() {
        let scorer = TraitScorer::new(Arc::new(FixedTraitModel::new(vec![0.1; 4])), 6);
        let (a, f, t) = inputs(6);
        assert!(matches!(scorer.score(&a, &f, &t), Err(ModelError::Output(_))));
    }

    #[test]
    fn test_shape_mismatch_rejected_before_inference() {
        let model = Arc::new(FixedTraitModel::new(vec![0.0; 5]));
        let scorer = TraitScorer::new(model.clone(), 6);
        let (a, f, t) = inputs(4);
        assert!(matches!(scorer.score(&a, &f, &t), Err(ModelError::Input(_))));

        let (_, f, t) = inputs(6);
        let short_audio = Array3::zeros((N_MFCC, 100, 1));
        assert!(matches!(
            scorer.score(&short_audio, &f, &t),
            Err(ModelError::Input(_))
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
