//! Asset download and payload normalization.

use crate::api::AssetDownloader;
use crate::archive::extract_single_entry;
use crate::error::UpdateResult;
use crate::resolve::ResolvedUpdate;

/// Download the resolved asset and unwrap it to the executable payload.
///
/// `.zip` assets must contain exactly one file, which becomes the payload.
/// Anything else is returned as downloaded.
pub async fn fetch_payload(
    downloader: &dyn AssetDownloader,
    update: &ResolvedUpdate,
) -> UpdateResult<Vec<u8>> {
    let bytes = downloader.download(&update.download_url).await?;
    tracing::debug!("Downloaded {} ({} bytes)", update.asset_name, bytes.len());

    if update.is_archive() {
        let payload = extract_single_entry(&bytes)?;
        tracing::debug!("Unwrapped {} to {} bytes", update.asset_name, payload.len());
        return Ok(payload);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::build_zip;
    use crate::error::UpdateError;
    use async_trait::async_trait;

    struct StaticDownloader(Vec<u8>);

    #[async_trait]
    impl AssetDownloader for StaticDownloader {
        async fn download(&self, _url: &str) -> UpdateResult<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn update(name: &str) -> ResolvedUpdate {
        ResolvedUpdate {
            asset_name: name.to_string(),
            download_url: format!("https://example.invalid/{}", name),
            version: "v1.0.0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_plain_asset_passes_through() {
        let downloader = StaticDownloader(b"raw-binary".to_vec());
        let payload = fetch_payload(&downloader, &update("app-linux"))
            .await
            .unwrap();
        assert_eq!(payload, b"raw-binary");
    }

    #[tokio::test]
    async fn test_zip_asset_is_extracted() {
        let downloader = StaticDownloader(build_zip(&[("app.exe", b"inner")]));
        let payload = fetch_payload(&downloader, &update("app-windows.zip"))
            .await
            .unwrap();
        assert_eq!(payload, b"inner");
    }

    #[tokio::test]
    async fn test_zip_with_two_files_is_rejected() {
        let downloader = StaticDownloader(build_zip(&[("a", b"1"), ("b", b"2")]));
        let result = fetch_payload(&downloader, &update("app.zip")).await;
        assert!(matches!(result, Err(UpdateError::ArchiveFormat { .. })));
    }
}
