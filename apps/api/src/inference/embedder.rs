//! Transcript → 768-d semantic embedding.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ndarray::{Array1, Array2};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

use super::{onnx_session, ModelError};

pub const EMBEDDING_DIM: usize = 768;

/// BERT-base context window.
pub const MAX_TOKENS: usize = 512;

pub type EmbeddingVector = Array1<f32>;

/// Raw text encoder. Implementations always run the model; the empty-text
/// fallback lives in `TextEmbedder`.
pub trait EmbeddingModel: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

pub struct TextEmbedder {
    model: Arc<dyn EmbeddingModel>,
}

impl TextEmbedder {
    pub fn new(model: Arc<dyn EmbeddingModel>) -> Self {
        Self { model }
    }

    /// Empty or whitespace-only text maps to the zero vector without touching
    /// the model.
    pub fn embed(&self, text: &str) -> Result<EmbeddingVector, ModelError> {
        if text.trim().is_empty() {
            debug!("empty transcript, using zero embedding");
            return Ok(Array1::zeros(EMBEDDING_DIM));
        }
        let vector = self.model.encode(text)?;
        if vector.len() != EMBEDDING_DIM {
            return Err(ModelError::Output(format!(
                "embedding has {} dimensions, expected {EMBEDDING_DIM}",
                vector.len()
            )));
        }
        Ok(Array1::from(vector))
    }
}

/// bert-base-uncased exported to ONNX, with its HF `tokenizer.json`.
pub struct BertOnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    wants_token_types: bool,
}

impl BertOnnxEmbedder {
    pub fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self, ModelError> {
        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| ModelError::Load(format!("{}: {e}", tokenizer_path.display())))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| ModelError::Load(format!("tokenizer truncation: {e}")))?;
        tokenizer.with_padding(None);

        let session = onnx_session(model_path)?;
        let wants_token_types = session.inputs.iter().any(|i| i.name == "token_type_ids");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            wants_token_types,
        })
    }
}

fn id_tensor(values: &[u32]) -> Result<Tensor<i64>, ModelError> {
    let row: Vec<i64> = values.iter().map(|&v| i64::from(v)).collect();
    let array = Array2::from_shape_vec((1, row.len()), row)
        .map_err(|e| ModelError::Input(e.to_string()))?;
    Tensor::from_array(array).map_err(|e| ModelError::Input(e.to_string()))
}

impl EmbeddingModel for BertOnnxEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ModelError::Input(format!("tokenization failed: {e}")))?;

        let mut inputs = ort::inputs![
            "input_ids" => id_tensor(encoding.get_ids())?,
            "attention_mask" => id_tensor(encoding.get_attention_mask())?,
        ];
        if self.wants_token_types {
            inputs.push((
                "token_type_ids".into(),
                id_tensor(encoding.get_type_ids())?.into(),
            ));
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("embedding session lock poisoned".to_string()))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        // First output of the export is last_hidden_state: (1, tokens, hidden).
        let (_, hidden_state) = outputs
            .iter()
            .next()
            .ok_or_else(|| ModelError::Output("embedding model produced no output".to_string()))?;
        let (shape, data) = hidden_state
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Output(e.to_string()))?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        if dims.len() != 3 || dims[0] != 1 {
            return Err(ModelError::Output(format!(
                "last_hidden_state has shape {dims:?}, expected (1, tokens, hidden)"
            )));
        }
        Ok(mean_pool(data, dims[1] as usize, dims[2] as usize))
    }
}

/// Mean over the token axis of a row-major (tokens, hidden) buffer.
fn mean_pool(data: &[f32], tokens: usize, hidden: usize) -> Vec<f32> {
    let mut pooled = vec![0.0_f32; hidden];
    if tokens == 0 {
        return pooled;
    }
    for row in data.chunks_exact(hidden).take(tokens) {
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += *v;
        }
    }
    let n = tokens as f32;
    pooled.iter_mut().for_each(|v| *v /= n);
    pooled
}
