//! Remote operations against the reconstruction backend.
//!
//! Every call issues exactly one request and never retries. Failures are
//! normalized into [`ApiError`] carrying the backend's own reason when the
//! body has one.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Config, Photo, ReconstructionResult, UploadedArtifact},
    error::ApiError,
    protocol::{
        ErrorBody, ExtractFramesQuery, IngestResponse, PhotoListResponse, ReconstructionResponse,
        SelectPhotosRequest, SelectPhotosResponse, UploadPhotosQuery, ARCHIVE_FIELD,
        EXTRACT_FRAMES_PATH, LIST_PHOTOS_PATH, PHOTOGRAMMETRY_PATH, SELECT_PHOTOS_PATH,
        UPLOAD_PHOTOS_PATH, VIDEO_FIELD,
    },
};
use tracing::{debug, info, warn};
use url::Url;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ExtractFrames,
    UploadPhotos,
    ListPhotos,
    ConfirmSelection,
    RunReconstruction,
    DownloadArtifact,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::ExtractFrames => "extract_frames",
            Operation::UploadPhotos => "upload_photos",
            Operation::ListPhotos => "list_photos",
            Operation::ConfirmSelection => "confirm_selection",
            Operation::RunReconstruction => "run_reconstruction",
            Operation::DownloadArtifact => "download_artifact",
        }
    }

    /// Reason reported when the backend fails without saying why.
    pub fn generic_failure(self) -> &'static str {
        match self {
            Operation::ExtractFrames => "failed to process video",
            Operation::UploadPhotos => "failed to process ZIP archive",
            Operation::ListPhotos => "failed to list photos",
            Operation::ConfirmSelection => "failed to confirm photo selection",
            Operation::RunReconstruction => "photogrammetry failed",
            Operation::DownloadArtifact => "failed to download result",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait PhotogrammetryApi: Send + Sync {
    async fn extract_frames(
        &self,
        video: &UploadedArtifact,
        config: &Config,
    ) -> ApiResult<IngestResponse>;
    async fn upload_photos(
        &self,
        archive: &UploadedArtifact,
        config: &Config,
    ) -> ApiResult<IngestResponse>;
    async fn list_photos(&self) -> ApiResult<Vec<Photo>>;
    async fn confirm_selection(&self, selected: &[String]) -> ApiResult<SelectPhotosResponse>;
    /// Blocks until the backend finishes; there is no partial progress.
    async fn run_reconstruction(&self) -> ApiResult<ReconstructionResult>;
    async fn download_artifact(&self, download_reference: &str) -> ApiResult<Vec<u8>>;
}

pub struct HttpGateway {
    http: Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> ApiResult<Self> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|e| ApiError::validation(format!("invalid backend url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::validation(format!(
                "backend url '{base_url}' cannot be used as a base"
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a backend-relative locator such as `/photo/a.jpg` or
    /// `/download/result.zip` against the base url.
    pub fn resolve(&self, locator: &str) -> ApiResult<Url> {
        if let Ok(absolute) = Url::parse(locator) {
            return Ok(absolute);
        }
        self.base_url
            .join(locator.trim_start_matches('/'))
            .map_err(|e| ApiError::validation(format!("invalid backend locator '{locator}': {e}")))
    }

    pub fn photo_url(&self, photo: &Photo) -> ApiResult<Url> {
        self.resolve(&photo.url)
    }

    async fn ingest(
        &self,
        operation: Operation,
        path: &str,
        field: &'static str,
        artifact: &UploadedArtifact,
        query: &(impl serde::Serialize + Sync),
    ) -> ApiResult<IngestResponse> {
        let url = self.resolve(path)?;
        info!(
            operation = operation.name(),
            file = %artifact.name,
            size = artifact.size,
            "uploading input to backend"
        );
        let part = Part::bytes(artifact.bytes.clone()).file_name(artifact.name.clone());
        let form = Form::new().part(field, part);
        let response = self
            .http
            .post(url)
            .query(query)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        let body: IngestResponse =
            decode_json(operation, expect_success(operation, response).await?).await?;
        info!(
            operation = operation.name(),
            images_processed = body.images_processed,
            "backend ingested input"
        );
        Ok(body)
    }
}

#[async_trait]
impl PhotogrammetryApi for HttpGateway {
    async fn extract_frames(
        &self,
        video: &UploadedArtifact,
        config: &Config,
    ) -> ApiResult<IngestResponse> {
        self.ingest(
            Operation::ExtractFrames,
            EXTRACT_FRAMES_PATH,
            VIDEO_FIELD,
            video,
            &ExtractFramesQuery::from(config),
        )
        .await
    }

    async fn upload_photos(
        &self,
        archive: &UploadedArtifact,
        config: &Config,
    ) -> ApiResult<IngestResponse> {
        self.ingest(
            Operation::UploadPhotos,
            UPLOAD_PHOTOS_PATH,
            ARCHIVE_FIELD,
            archive,
            &UploadPhotosQuery::from(config),
        )
        .await
    }

    async fn list_photos(&self) -> ApiResult<Vec<Photo>> {
        let operation = Operation::ListPhotos;
        let response = self
            .http
            .get(self.resolve(LIST_PHOTOS_PATH)?)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        let body: PhotoListResponse =
            decode_json(operation, expect_success(operation, response).await?).await?;
        if !body.success {
            let reason = body
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "no photos available".to_string());
            warn!(operation = operation.name(), %reason, "backend reported failure");
            return Err(ApiError::backend(None, reason));
        }
        debug!(operation = operation.name(), count = body.photos.len(), "listed photos");
        Ok(body.photos)
    }

    async fn confirm_selection(&self, selected: &[String]) -> ApiResult<SelectPhotosResponse> {
        let operation = Operation::ConfirmSelection;
        info!(
            operation = operation.name(),
            selected = selected.len(),
            "confirming photo selection"
        );
        let response = self
            .http
            .post(self.resolve(SELECT_PHOTOS_PATH)?)
            .json(&SelectPhotosRequest {
                selected_photos: selected.to_vec(),
            })
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        decode_json(operation, expect_success(operation, response).await?).await
    }

    async fn run_reconstruction(&self) -> ApiResult<ReconstructionResult> {
        let operation = Operation::RunReconstruction;
        info!(operation = operation.name(), "starting reconstruction");
        let response = self
            .http
            .post(self.resolve(PHOTOGRAMMETRY_PATH)?)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        let body: ReconstructionResponse =
            decode_json(operation, expect_success(operation, response).await?).await?;
        reconstruction_result(body)
    }

    async fn download_artifact(&self, download_reference: &str) -> ApiResult<Vec<u8>> {
        let operation = Operation::DownloadArtifact;
        let url = self.resolve(download_reference)?;
        info!(operation = operation.name(), %url, "downloading result");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        let bytes = expect_success(operation, response)
            .await?
            .bytes()
            .await
            .map_err(|e| transport_error(operation, e))?;
        Ok(bytes.to_vec())
    }
}

pub(crate) fn reconstruction_result(body: ReconstructionResponse) -> ApiResult<ReconstructionResult> {
    let operation = Operation::RunReconstruction;
    if !body.success {
        let reason = ErrorBody {
            detail: None,
            error: body.error,
            message: body.message,
        }
        .reason()
        .map(str::to_owned)
        .unwrap_or_else(|| operation.generic_failure().to_string());
        warn!(operation = operation.name(), %reason, "backend reported failure");
        return Err(ApiError::backend(None, reason));
    }
    let download_reference = body
        .download_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::decode("reconstruction succeeded without a download url"))?;
    Ok(ReconstructionResult {
        download_reference,
        mesh_statistics: body.mesh_statistics,
        texture_info: body.texture_info,
        images_processed: body.images_processed,
        completed_at: Utc::now(),
    })
}

fn transport_error(operation: Operation, err: reqwest::Error) -> ApiError {
    warn!(operation = operation.name(), error = %err, "request did not complete");
    ApiError::transport(format!(
        "{}: could not reach the backend",
        operation.generic_failure()
    ))
}

async fn expect_success(operation: Operation, response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let reason = serde_json::from_slice::<ErrorBody>(&body)
        .ok()
        .and_then(|body| body.reason().map(str::to_owned))
        .unwrap_or_else(|| operation.generic_failure().to_string());
    warn!(
        operation = operation.name(),
        status = status.as_u16(),
        %reason,
        "backend rejected request"
    );
    Err(ApiError::backend(Some(status.as_u16()), reason))
}

async fn decode_json<T: DeserializeOwned>(operation: Operation, response: Response) -> ApiResult<T> {
    response.json::<T>().await.map_err(|e| {
        warn!(operation = operation.name(), error = %e, "unexpected response body");
        ApiError::decode(format!(
            "{}: unexpected response from backend",
            operation.generic_failure()
        ))
    })
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
