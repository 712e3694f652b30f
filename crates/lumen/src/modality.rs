use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LumenError;

/// Kind of media a model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Image,
    Audio,
    Video,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Image, Modality::Audio, Modality::Video];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Video => "video",
        }
    }

    /// Marker files that exclude a directory tree from this modality.
    pub fn default_ignore_markers(self) -> Vec<String> {
        let own = match self {
            Modality::Image => ".noimage",
            Modality::Audio => ".nomusic",
            Modality::Video => ".novideo",
        };
        vec![".nomedia".to_string(), own.to_string()]
    }

    pub fn default_mime_types(self) -> Vec<String> {
        let types: &[&str] = match self {
            Modality::Image => &[
                "image/jpeg",
                "image/png",
                "image/bmp",
                "image/tiff",
                "image/webp",
                "image/heic",
                "image/heif",
            ],
            Modality::Audio => &[
                "audio/mpeg",
                "audio/mp4",
                "audio/ogg",
                "audio/vnd.wav",
                "audio/wav",
                "audio/x-wav",
                "audio/flac",
            ],
            Modality::Video => &[
                "video/mp4",
                "video/mpeg",
                "video/x-msvideo",
                "video/quicktime",
                "video/webm",
                "video/x-matroska",
            ],
        };
        types.iter().map(|t| t.to_string()).collect()
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = LumenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Modality::Image),
            "audio" => Ok(Modality::Audio),
            "video" => Ok(Modality::Video),
            other => Err(LumenError::Config(format!("unknown modality '{}'", other))),
        }
    }
}
