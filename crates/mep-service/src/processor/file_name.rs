use async_trait::async_trait;
use mep_core::attachment::MAX_FILE_NAME_LEN;
use mep_core::UnprocessedAttachment;

use super::Processor;
use crate::ProcessorError;

/// Replaces the working file name with the name the client uploaded,
/// stripped of any directory components.
#[derive(Debug, Default, Clone, Copy)]
pub struct UploadedFileNameProcessor;

/// Last path segment of a client-supplied name, control characters removed.
fn sanitize(client_name: &str) -> Option<String> {
    let base = client_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let base = base.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.chars().take(MAX_FILE_NAME_LEN).collect())
}

#[async_trait]
impl Processor for UploadedFileNameProcessor {
    fn name(&self) -> &str {
        "uploaded-file-name"
    }

    fn supports(&self, attachment: &UnprocessedAttachment) -> bool {
        attachment.source().is_upload()
    }

    async fn run(
        &self,
        mut attachment: UnprocessedAttachment,
    ) -> Result<UnprocessedAttachment, ProcessorError> {
        let sanitized = attachment
            .source()
            .client_name
            .as_deref()
            .and_then(sanitize);
        if let Some(name) = sanitized {
            attachment.set_file_name(name);
        }
        Ok(attachment)
    }
}
