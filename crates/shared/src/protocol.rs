use serde::{Deserialize, Serialize};

use crate::domain::{Config, MeshStatistics, Photo, TextureInfo};

pub const EXTRACT_FRAMES_PATH: &str = "/extractframes";
pub const UPLOAD_PHOTOS_PATH: &str = "/uploadphotos";
pub const LIST_PHOTOS_PATH: &str = "/photos";
pub const SELECT_PHOTOS_PATH: &str = "/photos/select";
pub const PHOTOGRAMMETRY_PATH: &str = "/photogrammetry";

/// Multipart field carrying the video for frame extraction.
pub const VIDEO_FIELD: &str = "video";
/// Multipart field carrying the photo archive.
pub const ARCHIVE_FIELD: &str = "photos_zip";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractFramesQuery {
    pub num_frames: u32,
    pub segment_objects: bool,
    pub reduction_percentage: u32,
}

impl From<&Config> for ExtractFramesQuery {
    fn from(config: &Config) -> Self {
        Self {
            num_frames: config.frame_count,
            segment_objects: config.segment_objects,
            reduction_percentage: config.reduction_percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPhotosQuery {
    pub segment_objects: bool,
    pub reduction_percentage: u32,
}

impl From<&Config> for UploadPhotosQuery {
    fn from(config: &Config) -> Self {
        Self {
            segment_objects: config.segment_objects,
            reduction_percentage: config.reduction_percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub images_processed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoListResponse {
    pub success: bool,
    #[serde(default)]
    pub photos: Vec<Photo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectPhotosRequest {
    pub selected_photos: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectPhotosResponse {
    pub remaining_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_photos: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_statistics: Option<MeshStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture_info: Option<TextureInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_processed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Failure body shape shared by every endpoint. Any of the fields may be
/// absent; `detail` wins when several are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn reason(&self) -> Option<&str> {
        [&self.detail, &self.error, &self.message]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}
