//! Processing parameters carried by a job.

use serde::{Deserialize, Serialize};

/// Maximum length of a codec/preset/bitrate token.
pub const MAX_TOKEN_LENGTH: usize = 64;

/// Maximum length of a video filter graph.
pub const MAX_FILTER_LENGTH: usize = 2048;

/// Highest CRF accepted by x264/x265.
pub const MAX_CRF: u8 = 51;

fn default_output_format() -> String {
    "mp4".to_string()
}

/// Processing parameters translated into tool arguments.
///
/// Every field is optional except the output container, which defaults
/// to `mp4`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobParams {
    /// Output container extension (e.g. "mp4", "webm", "mp3")
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
    /// Seek position in seconds (applied before the input)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek: Option<f64>,
    /// Duration limit in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_filter: Option<String>,
    /// Drop the audio stream
    #[serde(default)]
    pub no_audio: bool,
    /// Drop the video stream
    #[serde(default)]
    pub no_video: bool,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            output_format: default_output_format(),
            video_codec: None,
            audio_codec: None,
            crf: None,
            preset: None,
            audio_bitrate: None,
            seek: None,
            duration: None,
            video_filter: None,
            no_audio: false,
            no_video: false,
        }
    }
}

impl JobParams {
    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), String> {
        let format_ok = !self.output_format.is_empty()
            && self.output_format.len() <= 10
            && self
                .output_format
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !format_ok {
            return Err(format!(
                "Invalid output_format '{}': expected 1-10 lowercase alphanumerics",
                self.output_format
            ));
        }

        for (name, value) in [
            ("video_codec", &self.video_codec),
            ("audio_codec", &self.audio_codec),
            ("preset", &self.preset),
            ("audio_bitrate", &self.audio_bitrate),
        ] {
            if let Some(value) = value {
                if !is_valid_token(value) {
                    return Err(format!("Invalid {}: '{}'", name, value));
                }
            }
        }

        if let Some(crf) = self.crf {
            if crf > MAX_CRF {
                return Err(format!("crf must be between 0 and {}", MAX_CRF));
            }
        }

        if let Some(seek) = self.seek {
            if !seek.is_finite() || seek < 0.0 {
                return Err("seek must be a non-negative number of seconds".to_string());
            }
        }

        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration <= 0.0 {
                return Err("duration must be a positive number of seconds".to_string());
            }
        }

        if let Some(filter) = &self.video_filter {
            if filter.is_empty() || filter.len() > MAX_FILTER_LENGTH || filter.contains('\0') {
                return Err("Invalid video_filter".to_string());
            }
            if self.no_video {
                return Err("video_filter cannot be combined with no_video".to_string());
            }
        }

        if self.no_audio && self.no_video {
            return Err("no_audio and no_video cannot both be set".to_string());
        }

        Ok(())
    }
}

/// Codec names, presets and bitrates never need more than this charset.
fn is_valid_token(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_TOKEN_LENGTH
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
}
