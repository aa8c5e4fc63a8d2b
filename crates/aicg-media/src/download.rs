//! Bounded-parallel clip downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Default download parallelism for assembly inputs.
pub const DEFAULT_DOWNLOAD_PARALLELISM: usize = 5;

/// One file to fetch into the scratch directory.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    /// Fetchable URL (typically a presigned blob URL).
    pub url: String,
    /// File name inside the destination directory.
    pub file_name: String,
}

/// Download all items with bounded parallelism, preserving order.
///
/// Cancellation is checked before each item starts; in-flight transfers
/// finish. Any failure aborts the whole batch.
pub async fn download_all(
    client: &reqwest::Client,
    items: &[DownloadItem],
    dest_dir: &Path,
    max_parallel: usize,
    cancel_rx: Option<watch::Receiver<bool>>,
    mut on_complete: impl FnMut(usize),
) -> MediaResult<Vec<PathBuf>> {
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut handles = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        if let Some(rx) = &cancel_rx {
            if *rx.borrow() {
                return Err(MediaError::Cancelled);
            }
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MediaError::Cancelled)?;
        let client = client.clone();
        let url = item.url.clone();
        let dest = dest_dir.join(&item.file_name);

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            download_one(&client, &url, &dest).await.map(|_| (index, dest))
        }));
    }

    let mut paths = vec![PathBuf::new(); items.len()];
    for handle in handles {
        let (index, path) = handle
            .await
            .map_err(|e| MediaError::download_failed(format!("download task panicked: {e}")))??;
        on_complete(index);
        paths[index] = path;
    }

    Ok(paths)
}

async fn download_one(client: &reqwest::Client, url: &str, dest: &Path) -> MediaResult<()> {
    debug!(url, dest = %dest.display(), "downloading");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| MediaError::download_failed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::download_failed(format!(
            "GET {url} returned {status}"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| MediaError::download_failed(e.to_string()))?;

    if bytes.is_empty() {
        return Err(MediaError::download_failed(format!("{url} was empty")));
    }

    // Write to a temp name then rename so partial files never look done.
    let tmp = dest.with_extension("part");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, dest).await?;

    debug!(dest = %dest.display(), bytes = bytes.len(), "downloaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_before_start_aborts() {
        let (tx, rx) = watch::channel(true);
        let dir = tempfile::tempdir().unwrap();
        let items = vec![DownloadItem {
            url: "http://localhost:1/clip.mp4".into(),
            file_name: "clip_000.mp4".into(),
        }];

        let result = download_all(
            &reqwest::Client::new(),
            &items,
            dir.path(),
            2,
            Some(rx),
            |_| {},
        )
        .await;
        drop(tx);
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn empty_batch_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let paths = download_all(&reqwest::Client::new(), &[], dir.path(), 5, None, |_| {})
            .await
            .unwrap();
        assert!(paths.is_empty());
    }
}
