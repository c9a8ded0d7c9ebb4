//! One-shot metadata lookup after a scan completes

use crate::client::AnalysisClient;
use crate::hashing::is_valid_sha256;
use crate::model::{AssetKind, Metadata, ScanKind, ScanResult};

/// Identifier to look metadata up by.
///
/// File scans use the engine-reported content hash, falling back to the hash
/// of the uploaded bytes. URL scans use the engine's canonical URL id. Search
/// hits already carry their attributes, so they resolve to nothing.
pub fn resolve_identifier(
    result: &ScanResult,
    upload_sha256: Option<&str>,
) -> Option<(AssetKind, String)> {
    match result.kind {
        ScanKind::File => result
            .sha256
            .as_deref()
            .filter(|h| is_valid_sha256(h))
            .or_else(|| upload_sha256.filter(|h| is_valid_sha256(h)))
            .map(|h| (AssetKind::Files, h.to_ascii_lowercase())),
        ScanKind::Url => result
            .url_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| (AssetKind::Urls, id.to_string())),
        ScanKind::Search => None,
    }
}

/// Fetch metadata for a completed result. Never fails: any problem leaves the
/// metadata absent and is logged. No retry.
pub async fn enrich<C: AnalysisClient>(
    client: &C,
    result: &ScanResult,
    upload_sha256: Option<&str>,
) -> Option<Metadata> {
    let (kind, identifier) = match resolve_identifier(result, upload_sha256) {
        Some(found) => found,
        None => {
            log::debug!("No metadata identifier for {} ({})", result.id, result.kind);
            return None;
        }
    };

    match client.fetch_metadata(kind, &identifier).await {
        Ok(Some(metadata)) => Some(metadata),
        Ok(None) => {
            log::info!(
                "No {} metadata for {}",
                kind.path_segment(),
                identifier
            );
            None
        }
        Err(e) => {
            log::warn!("Metadata lookup for {} failed: {}", identifier, e);
            None
        }
    }
}
