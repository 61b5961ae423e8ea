use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::sample::{ErrorKind, SampleError};

#[derive(Clone, Debug, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct QrCode {
    pub text: String,
    #[serde(default)]
    pub points: Vec<[f32; 2]>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

/// Server-side timing attribution. Fields the service omits deserialize as
/// zero; that matches how prior reports treated missing server stats.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerStatistics {
    #[serde(default)]
    pub image_width: f64,
    #[serde(default)]
    pub image_height: f64,
    #[serde(default)]
    pub total_time_ms: f64,
    #[serde(default)]
    pub image_decode_time_ms: f64,
    #[serde(default)]
    pub detection_time_ms: f64,
    #[serde(default)]
    pub pool_acquisition_time_ms: f64,
}

impl ServerStatistics {
    pub fn as_metrics(&self) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();
        metrics.insert("total_time_ms".to_string(), self.total_time_ms);
        metrics.insert(
            "image_decode_time_ms".to_string(),
            self.image_decode_time_ms,
        );
        metrics.insert("detection_time_ms".to_string(), self.detection_time_ms);
        metrics.insert(
            "pool_acquisition_time_ms".to_string(),
            self.pool_acquisition_time_ms,
        );
        metrics
    }
}

/// Detection response shared by both sync endpoints and the streaming
/// result frame. Unknown fields are ignored; `success` must be present.
#[derive(Clone, Debug, Deserialize)]
pub struct DetectResponse {
    pub success: bool,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub qrcodes: Option<Vec<QrCode>>,
    #[serde(default)]
    pub statistics: Option<ServerStatistics>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DetectResponse {
    pub fn qrcodes(&self) -> &[QrCode] {
        self.qrcodes.as_deref().unwrap_or_default()
    }
}

/// Decode a detection body, classifying anything undecodable or missing a
/// required field as a protocol error. A body with `success: true` must
/// carry a `qrcodes` array.
pub fn parse_detect_body(bytes: &[u8]) -> Result<DetectResponse, SampleError> {
    let response: DetectResponse = serde_json::from_slice(bytes).map_err(|err| {
        SampleError::new(ErrorKind::Protocol, format!("undecodable body: {}", err))
    })?;
    if response.success && response.qrcodes.is_none() {
        return Err(SampleError::new(
            ErrorKind::Protocol,
            "successful response missing qrcodes",
        ));
    }
    Ok(response)
}

#[derive(Clone, Debug, Deserialize)]
pub struct PoolStats {
    pub initial_size: u64,
    pub max_size: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HealthResponse {
    pub service: String,
    pub version: String,
    #[serde(default)]
    pub features: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub pool_stats: Option<PoolStats>,
}

/// Client→server streaming frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame<'a> {
    Detect { image: &'a str },
    Close,
}
