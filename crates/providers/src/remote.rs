use crate::{EmbedResponse, EmbeddingProvider, ImageTensor, ProviderError};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub input_size: u32,
}

/// Client for an HTTP embedding service that accepts preprocessed tensors.
#[derive(Clone)]
pub struct RemoteProvider {
    client: Client,
    cfg: Arc<RemoteConfig>,
}

impl RemoteProvider {
    pub fn new(cfg: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn input_size(&self) -> (u32, u32) {
        (self.cfg.input_size, self.cfg.input_size)
    }

    async fn embed(&self, images: &[ImageTensor]) -> Result<EmbedResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [ImageTensor],
        }

        let body = EmbedRequest {
            model: &self.cfg.model,
            input: images,
        };
        debug!(count = images.len(), model = %self.cfg.model, "requesting embeddings");

        let mut req = self
            .client
            .post(format!(
                "{}/v1/embeddings",
                self.cfg.base_url.trim_end_matches('/')
            ))
            .json(&body);
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let parsed: EmbeddingApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(EmbedResponse {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }
}
