use anyhow::{Result, anyhow};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_MATRIX_FILE_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub data: Vec<u8>,
    pub content_type: String,
    pub filename: String,
    pub size: usize,
}

/// A download stopped because the body is larger than the caller accepts.
#[derive(Debug, Error)]
#[error("media is larger than the {limit} byte limit")]
pub struct MediaTooLarge {
    pub limit: u64,
}

#[derive(Clone)]
pub struct MediaHandler {
    client: Client,
    homeserver_url: String,
}

impl MediaHandler {
    pub fn new(homeserver_url: &str) -> Self {
        Self {
            client: Client::new(),
            homeserver_url: homeserver_url.trim_end_matches('/').to_string(),
        }
    }

    /// Turns `mxc://server/media` into a public download url; other urls pass through.
    ///
    /// This is the legacy unauthenticated endpoint, used for links posted to Discord.
    pub fn download_url(&self, uri: &str) -> String {
        match uri.strip_prefix("mxc://") {
            Some(mxc_path) => format!(
                "{}/_matrix/media/v3/download/{}",
                self.homeserver_url, mxc_path
            ),
            None => uri.to_string(),
        }
    }

    fn authenticated_download_url(&self, mxc_path: &str) -> String {
        format!(
            "{}/_matrix/client/v1/media/download/{}",
            self.homeserver_url, mxc_path
        )
    }

    /// Downloads `url`, failing with [`MediaTooLarge`] once more than `max_size` bytes arrive.
    pub async fn download_from_url(&self, url: &str, max_size: u64) -> Result<MediaInfo> {
        debug!("downloading media from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("failed to download from {}: {}", url, e))?;

        read_media(response, url, max_size).await
    }

    /// Downloads an `mxc://` uri through the authenticated media api.
    ///
    /// Homeservers that predate it answer 404 or 405; those fall back to the legacy endpoint.
    pub async fn download_matrix_media(
        &self,
        mxc_url: &str,
        access_token: &str,
        max_size: u64,
    ) -> Result<MediaInfo> {
        let Some(mxc_path) = mxc_url.strip_prefix("mxc://") else {
            return Err(anyhow!("invalid mxc URL: {}", mxc_url));
        };

        let url = self.authenticated_download_url(mxc_path);
        debug!("downloading media from {}", url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| anyhow!("failed to download from {}: {}", url, e))?;

        if should_fall_back(response.status()) {
            debug!(status = %response.status(), "authenticated media unavailable, trying the legacy endpoint");
            return self.download_from_url(&self.download_url(mxc_url), max_size).await;
        }

        read_media(response, &url, max_size).await
    }

    pub async fn upload_to_matrix(&self, media: &MediaInfo, access_token: &str) -> Result<String> {
        if media.size as u64 > MAX_MATRIX_FILE_SIZE {
            warn!(
                "file too large for Matrix: {} bytes (max {})",
                media.size, MAX_MATRIX_FILE_SIZE
            );
            return Err(anyhow!(
                "file too large for Matrix: {} bytes (max {})",
                media.size,
                MAX_MATRIX_FILE_SIZE
            ));
        }

        let mut upload_url = url::Url::parse(&format!(
            "{}/_matrix/media/v3/upload",
            self.homeserver_url
        ))?;
        upload_url
            .query_pairs_mut()
            .append_pair("filename", &media.filename);

        debug!("uploading {} to Matrix", media.filename);

        let response = self
            .client
            .post(upload_url)
            .bearer_auth(access_token)
            .header("Content-Type", &media.content_type)
            .body(media.data.clone())
            .send()
            .await
            .map_err(|e| anyhow!("failed to upload to Matrix: {}", e))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to upload to Matrix: {} - {}", status, body));
        }

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow!("failed to read response body: {}", e))?;
        let json: serde_json::Value = serde_json::from_slice(&body_bytes)
            .map_err(|e| anyhow!("failed to parse upload response: {}", e))?;

        let content_uri = json
            .get("content_uri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("no content_uri in upload response"))?
            .to_string();

        debug!("uploaded to Matrix: {}", content_uri);
        Ok(content_uri)
    }
}

fn should_fall_back(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::METHOD_NOT_ALLOWED
}

async fn read_media(mut response: Response, url: &str, max_size: u64) -> Result<MediaInfo> {
    if !response.status().is_success() {
        return Err(anyhow!(
            "failed to download from {}: status {}",
            url,
            response.status()
        ));
    }

    if response.content_length().is_some_and(|len| len > max_size) {
        return Err(MediaTooLarge { limit: max_size }.into());
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let mut data = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| anyhow!("failed to read response body: {}", e))?
    {
        if (data.len() + chunk.len()) as u64 > max_size {
            return Err(MediaTooLarge { limit: max_size }.into());
        }
        data.extend_from_slice(&chunk);
    }

    let size = data.len();
    debug!("downloaded {} bytes from {}", size, url);

    Ok(MediaInfo {
        data,
        content_type,
        filename: filename_from_url(url),
        size,
    })
}

fn filename_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("attachment")
        .to_string()
}
