use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, bail};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::model::{ParamDefaults, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationBackendKind {
    Remote,
    Torch,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub store_backend: StoreBackend,
    pub mongo_uri: String,
    pub mongo_db_name: String,
    pub mongo_collection: String,
    pub mongo_connect_retries: u32,
    pub generation_backend: GenerationBackendKind,
    pub task: TaskKind,
    pub model_id: String,
    pub inference_endpoint: String,
    pub inference_api_token: Option<String>,
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub generation_timeout: Duration,
    pub module_path: PathBuf,
    pub tokenizer_path: PathBuf,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // .env is optional
        let _ = dotenvy::dotenv();

        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));

        let store_backend = match var_or("STORE_BACKEND", "mongo").to_lowercase().as_str() {
            "mongo" | "mongodb" => StoreBackend::Mongo,
            "memory" => StoreBackend::Memory,
            other => bail!("unknown STORE_BACKEND: {other}"),
        };
        let mongo_uri = var_or("MONGO_URI", "mongodb://localhost:27017");
        let mongo_db_name = var_or("MONGO_DB_NAME", "prompt_history");
        let mongo_collection = var_or("MONGO_COLLECTION", "interactions");
        let mongo_connect_retries = parsed_or("MONGO_CONNECT_RETRIES", 3);

        let generation_backend = match var_or("GENERATION_BACKEND", "remote")
            .to_lowercase()
            .as_str()
        {
            "remote" | "http" => GenerationBackendKind::Remote,
            "torch" | "tch" => GenerationBackendKind::Torch,
            other => bail!("unknown GENERATION_BACKEND: {other}"),
        };

        let task: TaskKind = var_or("HF_TASK", "text-generation")
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid HF_TASK")?;
        let model_id = var_or("HF_MODEL", "distilgpt2");
        let inference_endpoint = env::var("INFERENCE_ENDPOINT").unwrap_or_else(|_| {
            format!("https://api-inference.huggingface.co/models/{model_id}")
        });
        let inference_api_token = env::var("INFERENCE_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let max_new_tokens = parsed_or("MAX_NEW_TOKENS", 128);
        let temperature = parsed_or("TEMPERATURE", 0.7);
        let generation_timeout = Duration::from_secs(parsed_or("GENERATION_TIMEOUT_SECS", 120));

        let module_path = PathBuf::from(var_or("MODULE_PATH", "models/distilgpt2.ts"));
        let tokenizer_path = PathBuf::from(var_or("TOKENIZER_PATH", "models/tokenizer.json"));

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            store_backend,
            mongo_uri,
            mongo_db_name,
            mongo_collection,
            mongo_connect_retries,
            generation_backend,
            task,
            model_id,
            inference_endpoint,
            inference_api_token,
            max_new_tokens,
            temperature,
            generation_timeout,
            module_path,
            tokenizer_path,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }

    pub fn param_defaults(&self) -> ParamDefaults {
        ParamDefaults {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
