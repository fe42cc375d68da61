use std::{fmt, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const MIN_FRAME_COUNT: u32 = 20;
pub const MAX_FRAME_COUNT: u32 = 200;
pub const MAX_REDUCTION_PERCENTAGE: u32 = 70;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];
pub const MAX_VIDEO_BYTES: u64 = 100 * 1024 * 1024;
pub const MAX_ARCHIVE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    None,
    Photos,
    Video,
}

impl Mode {
    pub fn is_chosen(self) -> bool {
        self != Mode::None
    }

    /// File extensions (lowercase, no dot) accepted for this input medium.
    pub fn accepted_extensions(self) -> &'static [&'static str] {
        match self {
            Mode::None => &[],
            Mode::Photos => ARCHIVE_EXTENSIONS,
            Mode::Video => VIDEO_EXTENSIONS,
        }
    }

    pub fn max_upload_bytes(self) -> u64 {
        match self {
            Mode::None => 0,
            Mode::Photos => MAX_ARCHIVE_BYTES,
            Mode::Video => MAX_VIDEO_BYTES,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mode::None => "none",
            Mode::Photos => "photos",
            Mode::Video => "video",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStep {
    #[default]
    Idle,
    Uploading,
    Processing,
    Selecting,
    Photogrammetry,
    Completed,
}

impl ProcessStep {
    /// Steps during which a long-running network call owns the workflow.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ProcessStep::Uploading | ProcessStep::Processing | ProcessStep::Photogrammetry
        )
    }
}

impl fmt::Display for ProcessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessStep::Idle => "idle",
            ProcessStep::Uploading => "uploading",
            ProcessStep::Processing => "processing",
            ProcessStep::Selecting => "selecting",
            ProcessStep::Photogrammetry => "photogrammetry",
            ProcessStep::Completed => "completed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub frame_count: u32,
    pub reduction_percentage: u32,
    pub segment_objects: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_count: 60,
            reduction_percentage: 0,
            segment_objects: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ApiError> {
        if !(MIN_FRAME_COUNT..=MAX_FRAME_COUNT).contains(&self.frame_count) {
            return Err(ApiError::validation(format!(
                "frame count must be between {MIN_FRAME_COUNT} and {MAX_FRAME_COUNT}, got {}",
                self.frame_count
            )));
        }
        if self.reduction_percentage > MAX_REDUCTION_PERCENTAGE {
            return Err(ApiError::validation(format!(
                "reduction percentage must be between 0 and {MAX_REDUCTION_PERCENTAGE}, got {}",
                self.reduction_percentage
            )));
        }
        Ok(())
    }
}

/// The user-supplied input: a video or a photo archive held in memory until
/// it is handed to the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    pub name: String,
    pub size: u64,
    pub bytes: Vec<u8>,
}

impl UploadedArtifact {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    pub fn validate_for(&self, mode: Mode) -> Result<(), ApiError> {
        if !mode.is_chosen() {
            return Err(ApiError::validation(
                "choose photos or video before selecting a file",
            ));
        }
        let accepted = mode.accepted_extensions();
        let extension = self.extension().unwrap_or_default();
        if !accepted.contains(&extension.as_str()) {
            return Err(ApiError::validation(format!(
                "'{}' is not a supported {mode} file (expected {})",
                self.name,
                accepted.join(", ")
            )));
        }
        if self.size > mode.max_upload_bytes() {
            return Err(ApiError::validation(format!(
                "'{}' is {} bytes, larger than the {} byte limit for {mode}",
                self.name,
                self.size,
                mode.max_upload_bytes()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for UploadedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedArtifact")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Photo {
    pub filename: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshStatistics {
    pub vertices: u64,
    pub faces: u64,
    pub triangles: u64,
    pub texture_coordinates: u64,
    pub vertex_normals: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    pub file_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureFile {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub size_mb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureInfo {
    #[serde(default)]
    pub texture_files: Vec<TextureFile>,
    pub total_textures: u32,
    pub total_texture_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionResult {
    pub download_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_statistics: Option<MeshStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture_info: Option<TextureInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_processed: Option<u32>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let too_few = Config {
            frame_count: 19,
            ..Config::default()
        };
        assert_eq!(
            too_few.validate().expect_err("too few frames").code,
            ErrorCode::Validation
        );

        let too_many = Config {
            frame_count: 201,
            ..Config::default()
        };
        assert!(too_many.validate().is_err());

        let reduced = Config {
            reduction_percentage: 71,
            ..Config::default()
        };
        assert!(reduced.validate().is_err());

        let edges = Config {
            frame_count: 200,
            reduction_percentage: 70,
            segment_objects: true,
        };
        assert!(edges.validate().is_ok());
    }

    #[test]
    fn artifact_kind_must_match_mode() {
        let video = UploadedArtifact::new("walkaround.MOV", vec![0; 16]);
        assert!(video.validate_for(Mode::Video).is_ok());
        assert!(video.validate_for(Mode::Photos).is_err());
        assert!(video.validate_for(Mode::None).is_err());

        let archive = UploadedArtifact::new("photos.zip", vec![0; 16]);
        assert!(archive.validate_for(Mode::Photos).is_ok());
        assert!(archive.validate_for(Mode::Video).is_err());

        let no_extension = UploadedArtifact::new("photos", vec![0; 16]);
        assert!(no_extension.validate_for(Mode::Photos).is_err());
    }

    #[test]
    fn artifact_size_limit_depends_on_mode() {
        let mut archive = UploadedArtifact::new("photos.zip", Vec::new());
        archive.size = MAX_ARCHIVE_BYTES + 1;
        let err = archive.validate_for(Mode::Photos).expect_err("too large");
        assert!(err.message.contains("byte limit"), "unexpected: {err}");

        let mut video = UploadedArtifact::new("clip.mp4", Vec::new());
        video.size = MAX_ARCHIVE_BYTES + 1;
        assert!(video.validate_for(Mode::Video).is_ok());
    }

    #[test]
    fn only_transfer_steps_are_busy() {
        assert!(ProcessStep::Uploading.is_busy());
        assert!(ProcessStep::Processing.is_busy());
        assert!(ProcessStep::Photogrammetry.is_busy());
        assert!(!ProcessStep::Idle.is_busy());
        assert!(!ProcessStep::Selecting.is_busy());
        assert!(!ProcessStep::Completed.is_busy());
    }
}
