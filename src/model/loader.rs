use std::{fs, path::Path, sync::Arc, time::Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tch::{Device, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::BackendError,
    model::{GenerationParams, TaskKind, backend::Pipeline},
};

const GPT2_EOS_TOKEN: i64 = 50256;

/// TorchScript causal language model run in-process.
pub struct TorchPipeline {
    tokenizer: Arc<Tokenizer>,
    module: Arc<Mutex<tch::CModule>>,
    device: Device,
    eos_token: i64,
}

impl TorchPipeline {
    pub fn load(
        task: TaskKind,
        module_path: &Path,
        tokenizer_path: &Path,
        device: Device,
    ) -> Result<Self, BackendError> {
        if task != TaskKind::TextGeneration {
            return Err(BackendError::UnsupportedTask(task));
        }
        if !module_path.exists() {
            return Err(BackendError::Initialization(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| BackendError::Tokenizer(e.to_string()))?;
        let eos_token = tokenizer
            .token_to_id("<|endoftext|>")
            .map(i64::from)
            .unwrap_or(GPT2_EOS_TOKEN);

        let size_bytes = fs::metadata(module_path)
            .map(|m| m.len())
            .map_err(|e| BackendError::Initialization(e.to_string()))?;
        let mut module = tch::CModule::load_on_device(module_path, device)
            .map_err(|e| BackendError::Initialization(e.to_string()))?;
        module.set_eval();
        debug!(path = %module_path.display(), size_bytes, "torchscript module loaded");

        Ok(Self {
            tokenizer: Arc::new(tokenizer),
            module: Arc::new(Mutex::new(module)),
            device,
            eos_token,
        })
    }
}

#[async_trait]
impl Pipeline for TorchPipeline {
    async fn run(
        &self,
        prompt: &str,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> Result<Value, BackendError> {
        let tokenizer = self.tokenizer.clone();
        let module = self.module.clone();
        let device = self.device;
        let eos_token = self.eos_token;
        let prompt = prompt.to_string();

        task::spawn_blocking(move || {
            let completion = generate_completion(
                &tokenizer, &module, device, eos_token, &prompt, params, &cancel,
            )?;
            // Causal pipelines echo the prompt ahead of the continuation.
            Ok(json!([{ "generated_text": format!("{prompt}{completion}") }]))
        })
        .await
        .map_err(|err| BackendError::Inference(format!("inference task failed: {err}")))?
    }
}

fn generate_completion(
    tokenizer: &Tokenizer,
    module: &Mutex<tch::CModule>,
    device: Device,
    eos_token: i64,
    prompt: &str,
    params: GenerationParams,
    cancel: &CancellationToken,
) -> Result<String, BackendError> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| BackendError::Tokenizer(e.to_string()))?;
    let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    if input_ids.is_empty() {
        input_ids.push(0);
    }
    let prompt_token_len = input_ids.len();

    let start = Instant::now();

    no_grad(|| {
        let module = module.lock();

        for _ in 0..params.max_new_tokens {
            // The caller gave up; release the module lock for the next request.
            if cancel.is_cancelled() {
                return Err(BackendError::Inference("generation cancelled".into()));
            }
            let input_tensor = Tensor::from_slice(&input_ids)
                .reshape([1, input_ids.len() as i64])
                .to(device);

            // Traced models return either bare logits or (logits, past).
            let output = module
                .forward_is(&[tch::IValue::Tensor(input_tensor)])
                .map_err(|e| BackendError::Inference(e.to_string()))?;
            let logits = match output {
                tch::IValue::Tensor(t) => t,
                tch::IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                    tch::IValue::Tensor(t) => t.shallow_clone(),
                    _ => {
                        return Err(BackendError::Inference(
                            "expected tensor as first tuple element".into(),
                        ));
                    }
                },
                _ => {
                    return Err(BackendError::Inference(
                        "unexpected model output format".into(),
                    ));
                }
            };

            // [1, seq_len, vocab] -> [vocab] for the last position
            let last_logits = logits.select(1, -1).squeeze();
            let next_token_id = if params.temperature > 0.0 {
                (&last_logits / params.temperature)
                    .softmax(-1, Kind::Float)
                    .multinomial(1, false)
                    .int64_value(&[0])
            } else {
                last_logits.argmax(0, false).int64_value(&[])
            };

            input_ids.push(next_token_id);
            if next_token_id == eos_token {
                break;
            }
        }

        Ok::<(), BackendError>(())
    })?;

    let generated_ids: Vec<u32> = input_ids[prompt_token_len..]
        .iter()
        .filter(|&&id| id != eos_token)
        .map(|&id| id as u32)
        .collect();
    debug!(
        tokens = generated_ids.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "torch generation finished"
    );

    tokenizer
        .decode(&generated_ids, true)
        .map_err(|e| BackendError::Tokenizer(e.to_string()))
}
