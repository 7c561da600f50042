use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GenError, InitError};

pub const DEFAULT_LOCAL_MODEL: &str = "microsoft/Phi-3-mini-4k-instruct";

/// Files and sampling settings for on-device generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelConfig {
    pub model_name: String,
    /// 4-bit GGUF weights, used on accelerators and as the CPU fallback.
    pub quantized_weights: Option<PathBuf>,
    /// Full-precision safetensors shards for CPU inference.
    pub full_weights: Vec<PathBuf>,
    /// `config.json` matching `full_weights`.
    pub model_config: Option<PathBuf>,
    pub tokenizer: Option<PathBuf>,
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub seed: u64,
    pub force_cpu: bool,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_LOCAL_MODEL.to_string(),
            quantized_weights: None,
            full_weights: Vec::new(),
            model_config: None,
            tokenizer: None,
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: None,
            seed: 299_792_458,
            force_cpu: false,
        }
    }
}

impl LocalModelConfig {
    pub fn has_full_weights(&self) -> bool {
        !self.full_weights.is_empty() && self.model_config.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Quantized4Bit,
    Full,
}

/// Weight format picked for a device: accelerators always run the 4-bit
/// weights; CPU prefers full precision and falls back to 4-bit.
pub fn plan_precision(accelerated: bool, config: &LocalModelConfig) -> Result<Precision, InitError> {
    let quantized = config.quantized_weights.is_some();
    if accelerated {
        return if quantized {
            Ok(Precision::Quantized4Bit)
        } else {
            Err(InitError::MissingResource(
                "quantized_weights (GGUF) is required on an accelerator".to_string(),
            ))
        };
    }
    if config.has_full_weights() {
        Ok(Precision::Full)
    } else if quantized {
        tracing::warn!(model = %config.model_name, "no full-precision weights configured, running 4-bit weights on CPU");
        Ok(Precision::Quantized4Bit)
    } else {
        Err(InitError::MissingResource(
            "configure quantized_weights or full_weights with model_config".to_string(),
        ))
    }
}

fn require_file(path: &Path) -> Result<(), InitError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(InitError::MissingResource(path.display().to_string()))
    }
}

/// Checks every file the chosen precision needs before anything is loaded.
pub fn check_resources(precision: Precision, config: &LocalModelConfig) -> Result<(), InitError> {
    let tokenizer = config
        .tokenizer
        .as_deref()
        .ok_or_else(|| InitError::MissingResource("tokenizer path is not configured".to_string()))?;
    require_file(tokenizer)?;
    match precision {
        Precision::Quantized4Bit => {
            if let Some(path) = &config.quantized_weights {
                require_file(path)?;
            }
        }
        Precision::Full => {
            if let Some(path) = &config.model_config {
                require_file(path)?;
            }
            for shard in &config.full_weights {
                require_file(shard)?;
            }
        }
    }
    Ok(())
}

#[cfg(not(feature = "local-inference"))]
pub struct LocalModel {
    _private: (),
}

#[cfg(not(feature = "local-inference"))]
impl LocalModel {
    pub fn load(config: &LocalModelConfig) -> Result<Self, InitError> {
        tracing::debug!(model = %config.model_name, "local inference not compiled in");
        Err(InitError::Unsupported(
            "local inference is not compiled in; rebuild with --features local-inference".to_string(),
        ))
    }

    pub fn device_label(&self) -> &'static str {
        "none"
    }

    pub fn generate(&mut self, _prompt: &str) -> Result<String, GenError> {
        Err(GenError::Inference("local inference is not compiled in".to_string()))
    }
}

#[cfg(feature = "local-inference")]
pub use self::candle_model::LocalModel;

#[cfg(feature = "local-inference")]
mod candle_model {
    use std::fs::File;

    use candle_core::quantized::gguf_file;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::VarBuilder;
    use candle_transformers::generation::LogitsProcessor;
    use candle_transformers::models::{phi3, quantized_phi3};
    use tokenizers::Tokenizer;

    use super::{check_resources, plan_precision, LocalModelConfig, Precision};
    use crate::error::{GenError, InitError};

    const STOP_TOKENS: [&str; 2] = ["<|end|>", "<|endoftext|>"];

    enum Weights {
        Quantized(quantized_phi3::ModelWeights),
        Full(phi3::Model),
    }

    impl Weights {
        fn forward(&mut self, input: &Tensor, offset: usize) -> candle_core::Result<Tensor> {
            match self {
                Weights::Quantized(model) => model.forward(input, offset),
                Weights::Full(model) => model.forward(input, offset),
            }
        }

        fn clear_cache(&mut self) {
            if let Weights::Full(model) = self {
                model.clear_kv_cache();
            }
        }
    }

    /// Phi-3 weights plus tokenizer resident on one device.
    pub struct LocalModel {
        weights: Weights,
        tokenizer: Tokenizer,
        device: Device,
        device_label: &'static str,
        stop_ids: Vec<u32>,
        config: LocalModelConfig,
    }

    fn select_device(force_cpu: bool) -> (Device, &'static str) {
        if !force_cpu {
            if candle_core::utils::cuda_is_available() {
                if let Ok(device) = Device::new_cuda(0) {
                    return (device, "cuda");
                }
            }
            if candle_core::utils::metal_is_available() {
                if let Ok(device) = Device::new_metal(0) {
                    return (device, "metal");
                }
            }
        }
        (Device::Cpu, "cpu")
    }

    fn model_err(err: impl std::fmt::Display) -> InitError {
        InitError::Model(err.to_string())
    }

    fn gen_err(err: impl std::fmt::Display) -> GenError {
        GenError::Inference(err.to_string())
    }

    impl LocalModel {
        pub fn load(config: &LocalModelConfig) -> Result<Self, InitError> {
            let (device, device_label) = select_device(config.force_cpu);
            let precision = plan_precision(!device.is_cpu(), config)?;
            check_resources(precision, config)?;

            let tokenizer_path = config
                .tokenizer
                .as_deref()
                .ok_or_else(|| InitError::MissingResource("tokenizer".to_string()))?;
            let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(model_err)?;

            let weights = match precision {
                Precision::Quantized4Bit => {
                    let path = config
                        .quantized_weights
                        .as_deref()
                        .ok_or_else(|| InitError::MissingResource("quantized_weights".to_string()))?;
                    let mut file = File::open(path).map_err(model_err)?;
                    let content = gguf_file::Content::read(&mut file).map_err(model_err)?;
                    Weights::Quantized(
                        quantized_phi3::ModelWeights::from_gguf(false, content, &mut file, &device)
                            .map_err(model_err)?,
                    )
                }
                Precision::Full => {
                    let config_path = config
                        .model_config
                        .as_deref()
                        .ok_or_else(|| InitError::MissingResource("model_config".to_string()))?;
                    let raw = std::fs::read_to_string(config_path).map_err(model_err)?;
                    let model_config: phi3::Config = serde_json::from_str(&raw).map_err(model_err)?;
                    // SAFETY: weight files must not be modified while mapped.
                    let vb = unsafe {
                        VarBuilder::from_mmaped_safetensors(config.full_weights.as_slice(), DType::F32, &device)
                            .map_err(model_err)?
                    };
                    Weights::Full(phi3::Model::new(&model_config, vb).map_err(model_err)?)
                }
            };

            let stop_ids = STOP_TOKENS
                .iter()
                .filter_map(|token| tokenizer.token_to_id(token))
                .collect();
            tracing::info!(
                model = %config.model_name,
                device = device_label,
                precision = ?precision,
                "local model loaded"
            );
            Ok(Self {
                weights,
                tokenizer,
                device,
                device_label,
                stop_ids,
                config: config.clone(),
            })
        }

        pub fn device_label(&self) -> &'static str {
            self.device_label
        }

        /// Samples up to `max_new_tokens` continuing `prompt`.
        pub fn generate(&mut self, prompt: &str) -> Result<String, GenError> {
            self.weights.clear_cache();
            let encoding = self.tokenizer.encode(prompt, true).map_err(gen_err)?;
            let prompt_ids = encoding.get_ids().to_vec();
            if prompt_ids.is_empty() {
                return Ok(String::new());
            }
            let temperature = (self.config.temperature > 0.0).then_some(self.config.temperature);
            let mut sampler = LogitsProcessor::new(self.config.seed, temperature, self.config.top_p);

            let mut generated: Vec<u32> = Vec::new();
            let mut input = prompt_ids.clone();
            let mut offset = 0usize;
            for _ in 0..self.config.max_new_tokens {
                let tensor = Tensor::new(input.as_slice(), &self.device)
                    .and_then(|t| t.unsqueeze(0))
                    .map_err(gen_err)?;
                let logits = self
                    .weights
                    .forward(&tensor, offset)
                    .and_then(|l| l.flatten_all())
                    .and_then(|l| l.to_dtype(DType::F32))
                    .map_err(gen_err)?;
                offset += input.len();
                let next = sampler.sample(&logits).map_err(gen_err)?;
                if self.stop_ids.contains(&next) {
                    break;
                }
                generated.push(next);
                input = vec![next];
            }
            tracing::debug!(
                prompt_tokens = prompt_ids.len(),
                generated = generated.len(),
                "local generation finished"
            );
            self.tokenizer.decode(&generated, true).map_err(gen_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_quantized() -> LocalModelConfig {
        LocalModelConfig {
            quantized_weights: Some(PathBuf::from("model-q4.gguf")),
            ..LocalModelConfig::default()
        }
    }

    #[test]
    fn accelerators_use_quantized_weights() {
        assert_eq!(plan_precision(true, &with_quantized()), Ok(Precision::Quantized4Bit));
        assert!(matches!(
            plan_precision(true, &LocalModelConfig::default()),
            Err(InitError::MissingResource(_))
        ));
    }

    #[test]
    fn cpu_prefers_full_precision() {
        let config = LocalModelConfig {
            full_weights: vec![PathBuf::from("model.safetensors")],
            model_config: Some(PathBuf::from("config.json")),
            ..with_quantized()
        };
        assert_eq!(plan_precision(false, &config), Ok(Precision::Full));
        assert_eq!(plan_precision(false, &with_quantized()), Ok(Precision::Quantized4Bit));
    }

    #[test]
    fn missing_files_are_reported() {
        let config = LocalModelConfig {
            tokenizer: Some(PathBuf::from("/nonexistent/tokenizer.json")),
            ..with_quantized()
        };
        assert_eq!(
            check_resources(Precision::Quantized4Bit, &config),
            Err(InitError::MissingResource("/nonexistent/tokenizer.json".to_string()))
        );
        assert!(matches!(
            check_resources(Precision::Full, &LocalModelConfig::default()),
            Err(InitError::MissingResource(_))
        ));
    }

    #[test]
    fn defaults_match_sampling_settings() {
        let config = LocalModelConfig::default();
        assert_eq!(config.max_new_tokens, 512);
        assert!((config.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.model_name, DEFAULT_LOCAL_MODEL);
    }

    #[cfg(not(feature = "local-inference"))]
    #[test]
    fn unsupported_without_feature() {
        assert!(matches!(
            LocalModel::load(&with_quantized()),
            Err(InitError::Unsupported(_))
        ));
    }
}
