//! Stream formats the gateway relays.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// HLS playlist.
    #[default]
    Hls,
    /// Motion JPEG multipart stream.
    Mjpeg,
    /// WebRTC signaling exchange.
    Webrtc,
    /// Single JPEG frame.
    Snapshot,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported stream format")]
pub struct UnknownFormat;

impl StreamFormat {
    pub const ALL: [StreamFormat; 4] = [Self::Hls, Self::Mjpeg, Self::Webrtc, Self::Snapshot];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hls => "hls",
            Self::Mjpeg => "mjpeg",
            Self::Webrtc => "webrtc",
            Self::Snapshot => "snapshot",
        }
    }

    /// Path segment appended after the camera key on the upstream.
    pub fn upstream_suffix(self) -> &'static str {
        match self {
            Self::Hls => "index.m3u8",
            Self::Mjpeg => "stream.mjpeg",
            Self::Webrtc => "webrtc",
            Self::Snapshot => "snapshot.jpg",
        }
    }

    /// Content type used when the upstream does not send one.
    pub fn default_content_type(self) -> &'static str {
        match self {
            Self::Hls => "application/vnd.apple.mpegurl",
            Self::Mjpeg => "multipart/x-mixed-replace; boundary=frame",
            Self::Webrtc => "application/json",
            Self::Snapshot => "image/jpeg",
        }
    }

    /// Only signaling carries a request body.
    pub fn allows_post(self) -> bool {
        matches!(self, Self::Webrtc)
    }

    /// Parse the optional `format` query value; absent means HLS.
    pub fn parse_optional(raw: Option<&str>) -> Result<Self, UnknownFormat> {
        match raw {
            None => Ok(Self::default()),
            Some(value) => value.parse(),
        }
    }
}

impl FromStr for StreamFormat {
    type Err = UnknownFormat;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hls" | "m3u8" => Ok(Self::Hls),
            "mjpeg" | "mjpg" => Ok(Self::Mjpeg),
            "webrtc" | "signaling" => Ok(Self::Webrtc),
            "snapshot" | "jpeg" | "frame" => Ok(Self::Snapshot),
            _ => Err(UnknownFormat),
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
