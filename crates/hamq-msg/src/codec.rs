//! ---
//! hamq_section: "02-messaging-ipc-data-model"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Message schema helpers, codecs and transport contracts."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
//! Body codecs.
//!
//! A job travels as `compress(serialize(record))`. Both steps are pure and
//! synchronous; [`WireCodec`] composes them for the dispatcher and the
//! consumers.
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hamq_common::config::{CodecConfig, CompressionKind, PayloadFormatKind};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{MessagingError, Result};

/// Reversible byte transform applied after serialization.
///
/// Implementations must satisfy `decode(encode(b)) == b` for every input.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Transform serialized bytes for transport.
    fn encode(&self, input: &[u8]) -> Result<Vec<u8>>;
    /// Reverse [`Codec::encode`].
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;
    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Gzip compression via `flate2`.
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    level: Compression,
}

impl GzipCodec {
    /// Codec using the given compression level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Codec for GzipCodec {
    fn encode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(input.len() / 2 + 32), self.level);
        encoder.write_all(input).map_err(MessagingError::Encode)?;
        encoder.finish().map_err(MessagingError::Encode)
    }

    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(input);
        let mut output = Vec::with_capacity(input.len() * 2);
        decoder
            .read_to_end(&mut output)
            .map_err(MessagingError::Decode)?;
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Pass-through codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn encode(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Serialization format for job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// UTF-8 JSON.
    #[default]
    Json,
    /// Binary CBOR.
    Cbor,
}

impl PayloadFormat {
    /// Serialize `record` into bytes.
    pub fn serialize<T: Serialize>(&self, record: &T) -> Result<Vec<u8>> {
        match self {
            PayloadFormat::Json => Ok(serde_json::to_vec(record)?),
            PayloadFormat::Cbor => Ok(serde_cbor::to_vec(record)?),
        }
    }

    /// Deserialize bytes produced by [`PayloadFormat::serialize`].
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            PayloadFormat::Json => Ok(serde_json::from_slice(bytes)?),
            PayloadFormat::Cbor => Ok(serde_cbor::from_slice(bytes)?),
        }
    }
}

impl From<PayloadFormatKind> for PayloadFormat {
    fn from(kind: PayloadFormatKind) -> Self {
        match kind {
            PayloadFormatKind::Json => PayloadFormat::Json,
            PayloadFormatKind::Cbor => PayloadFormat::Cbor,
        }
    }
}

/// Serialization plus compression, shared by producers and consumers.
#[derive(Debug, Clone)]
pub struct WireCodec {
    format: PayloadFormat,
    compression: Arc<dyn Codec>,
}

impl WireCodec {
    /// Compose a serialization format with a byte codec.
    pub fn new(format: PayloadFormat, compression: Arc<dyn Codec>) -> Self {
        Self {
            format,
            compression,
        }
    }

    /// Build the codec described by configuration.
    pub fn from_config(config: &CodecConfig) -> Self {
        let compression: Arc<dyn Codec> = match config.compression {
            CompressionKind::Gzip => Arc::new(GzipCodec::default()),
            CompressionKind::None => Arc::new(IdentityCodec),
        };
        Self::new(config.format.into(), compression)
    }

    /// Serialization format in use.
    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Name of the byte codec in use.
    pub fn compression_name(&self) -> &'static str {
        self.compression.name()
    }

    /// Serialize then compress a record.
    pub fn encode_record<T: Serialize>(&self, record: &T) -> Result<Bytes> {
        let serialized = self.format.serialize(record)?;
        Ok(Bytes::from(self.compression.encode(&serialized)?))
    }

    /// Decompress then deserialize a record.
    pub fn decode_record<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T> {
        let serialized = self.compression.decode(body)?;
        self.format.deserialize(&serialized)
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::from_config(&CodecConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrelationId, JobInformation, Order};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn gzip_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let codec = GzipCodec::default();
            let encoded = codec.encode(&bytes).unwrap();
            prop_assert_eq!(codec.decode(&encoded).unwrap(), bytes);
        }

        #[test]
        fn identity_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let codec = IdentityCodec;
            prop_assert_eq!(codec.decode(&codec.encode(&bytes).unwrap()).unwrap(), bytes);
        }
    }

    #[test]
    fn gzip_handles_empty_and_large_inputs() {
        let codec = GzipCodec::with_level(9);
        let empty = codec.encode(&[]).unwrap();
        assert!(codec.decode(&empty).unwrap().is_empty());

        let large: Vec<u8> = (0..(4 * 1024 * 1024)).map(|i| (i % 251) as u8).collect();
        let encoded = codec.encode(&large).unwrap();
        assert!(encoded.len() < large.len());
        assert_eq!(codec.decode(&encoded).unwrap(), large);
    }

    #[test]
    fn gzip_rejects_garbage() {
        let err = GzipCodec::default().decode(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, MessagingError::Decode(_)));
    }

    #[test]
    fn wire_codec_roundtrips_records_in_both_formats() {
        let job = JobInformation::new(CorrelationId::new());
        for format in [PayloadFormat::Json, PayloadFormat::Cbor] {
            let codec = WireCodec::new(format, Arc::new(GzipCodec::default()));
            let body = codec.encode_record(&job).unwrap();
            let decoded: JobInformation = codec.decode_record(&body).unwrap();
            assert_eq!(decoded, job);
        }
    }

    #[test]
    fn wire_codec_reports_shape_mismatch_as_malformed() {
        let codec = WireCodec::default();
        let body = codec.encode_record(&JobInformation::new(CorrelationId::new())).unwrap();
        let err = codec.decode_record::<Order>(&body).unwrap_err();
        assert!(matches!(err, MessagingError::Json(_)));
    }

    #[test]
    fn from_config_selects_codec() {
        let codec = WireCodec::from_config(&CodecConfig {
            compression: CompressionKind::None,
            format: PayloadFormatKind::Cbor,
        });
        assert_eq!(codec.compression_name(), "none");
        assert_eq!(codec.format(), PayloadFormat::Cbor);
    }
}
