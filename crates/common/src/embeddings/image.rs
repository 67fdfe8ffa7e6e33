//! Image description through a vision-capable generation endpoint

use crate::config::ServicesConfig;
use crate::errors::DescribeError;
use crate::http::{Endpoint, RateLimitedClient};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Arc<Vec<u8>>),
}

/// Image to be described, by file path or in-memory bytes
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    /// Display name, used as the source name of the derived document
    pub name: String,
    pub source: ImageSource,
}

impl ImageRef {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            source: ImageSource::Path(path),
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: ImageSource::Bytes(Arc::new(bytes)),
        }
    }

    /// Identity of the image source: its path, or a digest of in-memory bytes
    pub fn source_key(&self) -> String {
        match &self.source {
            ImageSource::Path(path) => format!("image:{}", path.display()),
            ImageSource::Bytes(bytes) => format!("image-bytes:{}", hex::encode(Sha256::digest(bytes.as_slice()))),
        }
    }

    pub async fn load(&self) -> Result<Arc<Vec<u8>>, DescribeError> {
        match &self.source {
            ImageSource::Bytes(bytes) => Ok(bytes.clone()),
            ImageSource::Path(path) => tokio::fs::read(path)
                .await
                .map(Arc::new)
                .map_err(|e| DescribeError::Read {
                    name: self.name.clone(),
                    message: e.to_string(),
                }),
        }
    }
}

/// Produces a natural-language description of one image
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    async fn describe(&self, image: &ImageRef) -> Result<String, DescribeError>;
}

/// Vision model behind an Ollama-style `/api/generate` endpoint
#[derive(Debug, Clone)]
pub struct HttpImageDescriber {
    client: RateLimitedClient,
    endpoint: Endpoint,
    model: String,
    prompt: String,
}

#[derive(Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct VisionResponse {
    #[serde(default)]
    response: String,
}

impl HttpImageDescriber {
    pub fn new(client: RateLimitedClient, services: &ServicesConfig) -> Self {
        let endpoint = Endpoint::post("vision", &services.vision_url)
            .with_api_key(&services.api_key_header, services.api_key.as_deref());

        Self {
            client,
            endpoint,
            model: services.vision_model.clone(),
            prompt: services.vision_prompt.clone(),
        }
    }
}

#[async_trait]
impl ImageDescriber for HttpImageDescriber {
    async fn describe(&self, image: &ImageRef) -> Result<String, DescribeError> {
        let bytes = image.load().await?;
        let request = VisionRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: vec![STANDARD.encode(bytes.as_slice())],
            stream: false,
        };

        let response: VisionResponse = self.client.send_json(&self.endpoint, &request).await?;
        let description = response.response.trim();
        if description.is_empty() {
            return Err(DescribeError::EmptyDescription {
                name: image.name.clone(),
            });
        }
        Ok(description.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{client, ScriptedTransport};
    use crate::http::RawResponse;

    #[test]
    fn test_name_from_path() {
        let image = ImageRef::from_path("/tmp/photos/cat.png");
        assert_eq!(image.name, "cat.png");
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let image = ImageRef::from_path("/definitely/not/here.png");
        assert!(matches!(image.load().await, Err(DescribeError::Read { .. })));
    }

    #[tokio::test]
    async fn test_describe_sends_base64_image() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"response":"  A cat on a mat. "}"#,
        ))]));
        let describer = HttpImageDescriber::new(client(transport.clone()), &ServicesConfig::default());

        let text = describer
            .describe(&ImageRef::from_bytes("cat.png", b"png".to_vec()))
            .await
            .unwrap();

        assert_eq!(text, "A cat on a mat.");
        let payload = &transport.payloads()[0];
        assert_eq!(payload["images"][0], STANDARD.encode(b"png"));
        assert_eq!(payload["prompt"], "Describe the image in detail");
        assert_eq!(payload["model"], "moondream:latest");
    }

    #[tokio::test]
    async fn test_blank_description_rejected() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"response":"   "}"#,
        ))]));
        let describer = HttpImageDescriber::new(client(transport), &ServicesConfig::default());

        let err = describer
            .describe(&ImageRef::from_bytes("blank.png", vec![0]))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DescribeError::EmptyDescription {
                name: "blank.png".into()
            }
        );
    }
}
