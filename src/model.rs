use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Ffmpeg,
    Mjpeg,
    Jpeg,
    Vlc,
    H264,
    Onvif,
    Bubble,
    Hls,
    #[serde(rename = "http_video")]
    HttpVideo,
    #[serde(rename = "http_unknown")]
    HttpUnknown,
    #[serde(rename = "mpeg-dash")]
    MpegDash,
}

/// One URL template row. `url` is a relative path, possibly with a query
/// string and `[PLACEHOLDER]`/`{PLACEHOLDER}` markers. `port` 0 means
/// "derive from the protocol".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamPattern {
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    pub protocol: String,
    #[serde(default)]
    pub port: u16,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraEntry {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(flatten)]
    pub pattern: StreamPattern,
}

/// A brand record, one JSON file per brand. `brand_id` equals the
/// filename stem; the loader enforces that.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Camera {
    pub brand: String,
    #[serde(default)]
    pub brand_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default)]
    pub entries: Vec<CameraEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_score: Option<f32>,
}

/// Per-request inputs used to instantiate pattern templates.
#[derive(Clone, Debug)]
pub struct BuildContext {
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub channel: u8,
    pub width: u32,
    pub height: u32,
    pub protocol_override: Option<String>,
}

impl BuildContext {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: 0,
            username: String::new(),
            password: String::new(),
            channel: 0,
            width: 640,
            height: 480,
            protocol_override: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveredStream {
    pub url: String,
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    pub protocol: String,
    pub port: u16,
    pub working: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub has_audio: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub test_time_ms: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl DiscoveredStream {
    pub fn new(url: impl Into<String>, stream_type: StreamType, protocol: impl Into<String>, port: u16) -> Self {
        Self {
            url: url.into(),
            stream_type,
            protocol: protocol.into(),
            port,
            working: false,
            resolution: None,
            codec: None,
            fps: None,
            bitrate: None,
            has_audio: false,
            error: None,
            test_time_ms: 0,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanStarted {
        target: String,
    },
    Progress {
        tested: usize,
        found: usize,
        remaining: usize,
    },
    StreamFound {
        stream: DiscoveredStream,
    },
    Complete {
        total_tested: usize,
        total_found: usize,
        duration_seconds: f64,
    },
    Error {
        message: String,
    },
    Done,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiscoveryRequest {
    pub target: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub channel: u8,
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,
    #[serde(default = "default_timeout_seconds", rename = "timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_model_limit")]
    pub model_limit: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target is required")]
    MissingTarget,
    #[error("max_streams must be within 1..=50, got {0}")]
    MaxStreams(usize),
    #[error("timeout must be within 10..=600 seconds, got {0}")]
    Timeout(u64),
    #[error("model_limit must be within 1..=20, got {0}")]
    ModelLimit(usize),
}

impl DiscoveryRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target.trim().is_empty() {
            return Err(ValidationError::MissingTarget);
        }
        if !(1..=50).contains(&self.max_streams) {
            return Err(ValidationError::MaxStreams(self.max_streams));
        }
        if !(10..=600).contains(&self.timeout_seconds) {
            return Err(ValidationError::Timeout(self.timeout_seconds));
        }
        if !(1..=20).contains(&self.model_limit) {
            return Err(ValidationError::ModelLimit(self.model_limit));
        }
        Ok(())
    }

    /// True when the target is already a full stream URL rather than a host.
    pub fn is_direct_url(&self) -> bool {
        let t = self.target.trim().to_ascii_lowercase();
        t.starts_with("rtsp://") || t.starts_with("http://") || t.starts_with("https://")
    }

    pub fn build_context(&self) -> BuildContext {
        let target = self.target.trim();
        let (ip, port) = match target.rsplit_once(':') {
            Some((host, p)) if !host.is_empty() => match p.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (target.to_string(), 0),
            },
            _ => (target.to_string(), 0),
        };

        let mut ctx = BuildContext::new(ip);
        ctx.port = port;
        ctx.username = self.username.clone().unwrap_or_default();
        ctx.password = self.password.clone().unwrap_or_default();
        ctx.channel = self.channel;
        ctx
    }
}

fn default_max_streams() -> usize {
    10
}

fn default_timeout_seconds() -> u64 {
    240
}

fn default_model_limit() -> usize {
    6
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str) -> DiscoveryRequest {
        serde_json::from_value(serde_json::json!({ "target": target })).unwrap()
    }

    #[test]
    fn request_defaults() {
        let req = request("192.168.1.10");
        assert_eq!(req.max_streams, 10);
        assert_eq!(req.timeout_seconds, 240);
        assert_eq!(req.model_limit, 6);
        assert_eq!(req.channel, 0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn request_rejects_out_of_range() {
        let mut req = request("192.168.1.10");
        req.max_streams = 51;
        assert_eq!(req.validate(), Err(ValidationError::MaxStreams(51)));

        let mut req = request("192.168.1.10");
        req.timeout_seconds = 5;
        assert_eq!(req.validate(), Err(ValidationError::Timeout(5)));

        let req = request("  ");
        assert_eq!(req.validate(), Err(ValidationError::MissingTarget));
    }

    #[test]
    fn direct_url_detection() {
        assert!(request("rtsp://10.0.0.5/live").is_direct_url());
        assert!(request("https://cam.local/feed").is_direct_url());
        assert!(!request("192.168.1.10").is_direct_url());
    }

    #[test]
    fn build_context_splits_host_and_port() {
        let ctx = request("192.168.1.10:8080").build_context();
        assert_eq!(ctx.ip, "192.168.1.10");
        assert_eq!(ctx.port, 8080);
        assert_eq!((ctx.width, ctx.height), (640, 480));

        let ctx = request("192.168.1.10").build_context();
        assert_eq!(ctx.ip, "192.168.1.10");
        assert_eq!(ctx.port, 0);
    }

    #[test]
    fn camera_entry_flattens_pattern() {
        let entry: CameraEntry = serde_json::from_value(serde_json::json!({
            "models": ["DS-2CD2032"],
            "type": "ffmpeg",
            "protocol": "rtsp",
            "port": 554,
            "url": "Streaming/Channels/[CHANNEL+1]01"
        }))
        .unwrap();
        assert_eq!(entry.models, vec!["DS-2CD2032"]);
        assert_eq!(entry.pattern.stream_type, StreamType::Ffmpeg);
        assert_eq!(entry.pattern.port, 554);
    }

    #[test]
    fn scan_event_wire_shape() {
        let ev = ScanEvent::Progress {
            tested: 4,
            found: 1,
            remaining: 12,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["tested"], 4);

        let v = serde_json::to_value(ScanEvent::Done).unwrap();
        assert_eq!(v["type"], "done");
    }

    #[test]
    fn stream_type_wire_names() {
        assert_eq!(serde_json::to_value(StreamType::HttpVideo).unwrap(), "http_video");
        assert_eq!(serde_json::to_value(StreamType::MpegDash).unwrap(), "mpeg-dash");
        assert_eq!(serde_json::to_value(StreamType::Ffmpeg).unwrap(), "ffmpeg");
    }
}
