use std::path::Path;
use std::time::Duration;

use deltalake::parquet::file::reader::ChunkReader;
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::errors::{ConfigError, FetchError};

/// Builds the shared HTTP client; `timeout` bounds each whole request.
pub fn http_client(timeout: Duration) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Invalid {
            message: format!("failed to build HTTP client: {}", e),
        })
}

async fn send(client: &Client, url: &str) -> Result<Response, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

/// Downloads the whole response body into memory.
pub async fn get_bytes(
    client: &Client,
    url: &str,
) -> Result<impl ChunkReader + AsRef<[u8]> + Send + 'static, FetchError> {
    let response = send(client, url).await?;
    let body = response
        .bytes()
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;
    debug!("Downloaded {} bytes from {}", body.len(), url);
    Ok(body)
}

/// Streams the response body into `path`. A partially written file is removed.
pub async fn download_to(client: &Client, url: &str, path: &Path) -> Result<u64, FetchError> {
    let response = send(client, url).await?;
    match stream_to_file(response, url, path).await {
        Ok(written) => Ok(written),
        Err(err) => {
            let _ = tokio::fs::remove_file(path).await;
            Err(err)
        }
    }
}

async fn stream_to_file(mut response: Response, url: &str, path: &Path) -> Result<u64, FetchError> {
    let write_err = |source| FetchError::Write {
        path: path.display().to_string(),
        source,
    };

    let mut file = tokio::fs::File::create(path).await.map_err(write_err)?;
    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?
    {
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    Ok(written)
}
