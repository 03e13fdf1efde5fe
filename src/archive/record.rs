//! Archive record encoding
//!
//! A [`LogRecord`] holds one captured request as `base64(gzip(raw))`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::{PilosaError, Result};

/// One archived request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Time the worker received the payload
    #[serde(rename = "When")]
    pub when: DateTime<Utc>,

    /// Base64 of the gzip-compressed payload
    #[serde(rename = "Data_x64")]
    pub data_x64: String,
}

impl LogRecord {
    /// Compress and encode a raw payload
    pub fn encode(when: DateTime<Utc>, raw: &[u8]) -> Result<Self> {
        let buf = Vec::with_capacity(raw.len() / 2 + 32);
        let mut encoder = GzEncoder::new(buf, Compression::default());
        encoder.write_all(raw)?;
        let compressed = encoder.finish()?;

        Ok(Self {
            when,
            data_x64: STANDARD.encode(compressed),
        })
    }

    /// Recover the original payload
    pub fn decode(&self) -> Result<Vec<u8>> {
        let compressed = STANDARD.decode(&self.data_x64).map_err(|e| {
            PilosaError::InvalidRequest(format!("record is not valid base64: {}", e))
        })?;

        let mut raw = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;
        Ok(raw)
    }
}
