mod routes;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

use std::sync::Arc;

use anyhow::{Context, Result};
use mep_core::constraints::FileConstraints;
use mep_service::FileStorageManager;
use regex::Regex;
use tokio::net::TcpListener;

pub use routes::{build_router, AppState, InnerAppState};

/// Upload checks from `MEP_UPLOAD_MAX_SIZE` (bytes), `MEP_UPLOAD_MIME_TYPES`
/// (comma separated, `image/*` allowed) and `MEP_UPLOAD_NAME_PATTERN` (regex).
pub fn constraints_from_env() -> Result<FileConstraints> {
    let max_size = match std::env::var("MEP_UPLOAD_MAX_SIZE") {
        Ok(raw) => Some(
            raw.parse::<u64>()
                .with_context(|| format!("MEP_UPLOAD_MAX_SIZE={raw:?}"))?,
        ),
        Err(_) => None,
    };
    let mime_types = std::env::var("MEP_UPLOAD_MIME_TYPES")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let name_pattern = match std::env::var("MEP_UPLOAD_NAME_PATTERN") {
        Ok(raw) => Some(Regex::new(&raw).with_context(|| format!("MEP_UPLOAD_NAME_PATTERN={raw:?}"))?),
        Err(_) => None,
    };
    Ok(FileConstraints {
        max_size,
        mime_types,
        name_pattern,
    })
}

pub async fn serve(
    listener: TcpListener,
    manager: FileStorageManager,
    constraints: FileConstraints,
) -> Result<()> {
    let state = Arc::new(InnerAppState {
        manager,
        constraints,
    });
    let app = routes::build_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
