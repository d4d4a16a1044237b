//! Record encoding for the engine.

use crate::record::Record;

/// Converts records to and from the bytes stored in the engine.
pub trait Codec: Send + Sync {
    fn encode(&self, record: &Record) -> Result<Vec<u8>, serde_json::Error>;
    fn decode(&self, bytes: &[u8]) -> Result<Record, serde_json::Error>;
}

/// JSON text encoding of the record's fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, record: &Record) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(record)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
