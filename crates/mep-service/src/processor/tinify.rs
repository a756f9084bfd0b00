use std::io::Write;

use async_trait::async_trait;
use mep_core::UnprocessedAttachment;
use reqwest::{header, Client};
use tracing::{debug, info};

use super::Processor;
use crate::ProcessorError;

pub const TINIFY_API_URL: &str = "https://api.tinify.com";

const COMPRESS_OPTION: &str = "compress";
const SUPPORTED_MIME_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

#[derive(Debug, Clone)]
pub struct TinifyConfig {
    pub api_key: Option<String>,
    /// Skip the API call and only tag the metadata. Used outside production.
    pub dummy: bool,
    pub api_url: String,
}

impl TinifyConfig {
    pub fn dummy() -> Self {
        Self {
            api_key: None,
            dummy: true,
            api_url: TINIFY_API_URL.to_string(),
        }
    }

    /// `MEP_TINIFY_API_KEY`, `MEP_TINIFY_DUMMY` (defaults to on unless
    /// `MEP_ENV=prod`), `MEP_TINIFY_API_URL`.
    pub fn from_env() -> Self {
        let production = std::env::var("MEP_ENV").is_ok_and(|env| env == "prod");
        let dummy = std::env::var("MEP_TINIFY_DUMMY")
            .ok()
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(!production);
        Self {
            api_key: std::env::var("MEP_TINIFY_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            dummy,
            api_url: std::env::var("MEP_TINIFY_API_URL")
                .unwrap_or_else(|_| TINIFY_API_URL.to_string()),
        }
    }
}

/// Compresses JPEG and PNG uploads through the Tinify API when the caller
/// passes `compress: true`.
pub struct TinifyProcessor {
    mode: Mode,
}

enum Mode {
    Dummy,
    Live {
        client: Client,
        api_key: String,
        api_url: String,
    },
}

impl TinifyProcessor {
    pub fn new(config: TinifyConfig) -> Result<Self, ProcessorError> {
        if config.dummy {
            return Ok(Self { mode: Mode::Dummy });
        }
        let api_key = config.api_key.ok_or_else(|| {
            ProcessorError::InvalidOptions("tinify api key required outside dummy mode".into())
        })?;
        Ok(Self {
            mode: Mode::Live {
                client: Client::new(),
                api_key,
                api_url: config.api_url.trim_end_matches('/').to_string(),
            },
        })
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self.mode, Mode::Dummy)
    }
}

async fn shrink(
    client: &Client,
    api_key: &str,
    api_url: &str,
    data: Vec<u8>,
) -> Result<Vec<u8>, ProcessorError> {
    let resp = client
        .post(format!("{api_url}/shrink"))
        .basic_auth("api", Some(api_key))
        .body(data)
        .send()
        .await
        .map_err(|e| ProcessorError::Http(format!("shrink: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ProcessorError::Http(format!("shrink: {status}: {body}")));
    }
    let location = resp
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ProcessorError::Http("shrink: response has no Location".into()))?
        .to_string();

    let output = client
        .get(&location)
        .basic_auth("api", Some(api_key))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ProcessorError::Http(format!("download {location}: {e}")))?
        .bytes()
        .await
        .map_err(|e| ProcessorError::Http(format!("download {location}: {e}")))?;
    Ok(output.to_vec())
}

#[async_trait]
impl Processor for TinifyProcessor {
    fn name(&self) -> &str {
        "tinify"
    }

    fn supports(&self, attachment: &UnprocessedAttachment) -> bool {
        attachment.processor_options().flag(COMPRESS_OPTION)
            && SUPPORTED_MIME_TYPES
                .iter()
                .any(|m| attachment.mime_type().eq_ignore_ascii_case(m))
    }

    async fn run(
        &self,
        mut attachment: UnprocessedAttachment,
    ) -> Result<UnprocessedAttachment, ProcessorError> {
        match &self.mode {
            Mode::Dummy => {
                debug!(file = attachment.file_name(), "tinify dummy mode, bytes unchanged");
                attachment
                    .metadata_mut()
                    .insert("dummy", true)
                    .map_err(|e| ProcessorError::InvalidOptions(e.to_string()))?;
            }
            Mode::Live {
                client,
                api_key,
                api_url,
            } => {
                let data = tokio::fs::read(attachment.current_path())
                    .await
                    .map_err(|e| {
                        ProcessorError::Io(format!(
                            "read {}: {e}",
                            attachment.current_path().display()
                        ))
                    })?;
                let original_size = data.len();
                let compressed = shrink(client, api_key, api_url, data).await?;

                if compressed.len() < original_size {
                    let mut file = tempfile::Builder::new()
                        .prefix("mep-tinify-")
                        .tempfile()
                        .map_err(|e| ProcessorError::Io(format!("temp file: {e}")))?;
                    file.write_all(&compressed)
                        .map_err(|e| ProcessorError::Io(format!("write temp file: {e}")))?;
                    attachment.replace_file(file.into_temp_path(), compressed.len() as u64);
                    info!(
                        file = attachment.file_name(),
                        before = original_size,
                        after = compressed.len(),
                        "compressed image"
                    );
                } else {
                    debug!(file = attachment.file_name(), "tinify output not smaller, kept original");
                }
            }
        }

        attachment.processor_options_mut().remove(COMPRESS_OPTION);
        attachment
            .metadata_mut()
            .insert("compressed", true)
            .map_err(|e| ProcessorError::InvalidOptions(e.to_string()))?;
        Ok(attachment)
    }
}
