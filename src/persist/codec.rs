//! JSON encoding of boot cycle records and rotation counters.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::codes::BootCycle;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encode(serde_json::Error),
    #[error("decoding failed: {0}")]
    Decode(serde_json::Error),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}

pub fn encode_cycle(cycle: &BootCycle) -> Result<Vec<u8>, CodecError> {
    encode(cycle)
}

pub fn decode_cycle(bytes: &[u8]) -> Result<BootCycle, CodecError> {
    decode(bytes)
}

pub fn encode_counter(value: u16) -> Result<Vec<u8>, CodecError> {
    encode(&value)
}

pub fn decode_counter(bytes: &[u8]) -> Result<u16, CodecError> {
    decode(bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codes::PostCode;

    #[test]
    fn test_cycle_keeps_order_and_types() {
        let mut cycle = BootCycle::new();
        cycle.insert(u64::MAX - 10, PostCode::new(u64::MAX, vec![0, 255]));
        cycle.insert(u64::MAX - 3, PostCode::new(0x02, vec![]));

        let bytes = encode_cycle(&cycle).unwrap();
        let decoded = decode_cycle(&bytes).unwrap();
        assert_eq!(decoded, cycle);

        let keys: Vec<u64> = decoded.into_map().into_keys().collect();
        assert_eq!(keys, vec![u64::MAX - 10, u64::MAX - 3]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_cycle(b"{\"1\": 7"), Err(CodecError::Decode(_))));
        assert!(decode_counter(b"70000").is_err());
        assert!(decode_counter(b"\"3\"").is_err());
        assert_eq!(decode_counter(b"42").unwrap(), 42);
    }
}
