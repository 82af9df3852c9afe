// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::{DownloadError, HttpError};
use crate::http::HttpClient;

/// Progress notifications from a running transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferProgress {
    /// The response arrived and the body is about to stream
    Started { content_length: Option<u64> },
    /// Bytes written to the temporary file so far
    Written { bytes: u64, total: Option<u64> },
}

/// Stream an episode's audio into a temporary file.
///
/// Reports progress through `on_progress` and returns the number of bytes
/// written. The file is flushed and synced before returning.
pub async fn run_transfer<C, F>(
    client: &C,
    url: &Url,
    temp_path: &Path,
    mut on_progress: F,
) -> Result<u64, DownloadError>
where
    C: HttpClient + ?Sized,
    F: FnMut(TransferProgress),
{
    let url_str = url.as_str();
    let transfer_failed = |source: HttpError| DownloadError::TransferFailed {
        url: url_str.to_string(),
        source,
    };
    let staging_failed = |source: std::io::Error| DownloadError::StagingFailed {
        path: temp_path.to_path_buf(),
        source,
    };

    // Get streaming response
    let response = client.get_stream(url_str).await.map_err(transfer_failed)?;

    // Check for HTTP errors
    if !response.is_success() {
        return Err(transfer_failed(HttpError::Status {
            url: url_str.to_string(),
            status: response.status,
        }));
    }

    on_progress(TransferProgress::Started {
        content_length: response.content_length,
    });

    let mut file = File::create(temp_path).await.map_err(staging_failed)?;

    // Stream body to file
    let mut bytes_written: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(transfer_failed)?;

        file.write_all(&chunk).await.map_err(staging_failed)?;
        bytes_written += chunk.len() as u64;

        on_progress(TransferProgress::Written {
            bytes: bytes_written,
            total: response.content_length,
        });
    }

    // Ensure all data is on disk before anyone copies it
    file.flush().await.map_err(staging_failed)?;
    file.sync_all().await.map_err(staging_failed)?;

    Ok(bytes_written)
}

/// Fraction complete, 0 while the total is unknown
pub fn fraction(bytes: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) if total > 0 => (bytes as f64 / total as f64).clamp(0.0, 1.0),
        _ => 0.0,
    }
}
