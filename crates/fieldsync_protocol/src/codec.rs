//! CBOR payload encoding.
//!
//! Payloads are opaque to the engine; entity types serialize themselves with
//! serde and the engine only ever moves the resulting bytes around.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Crop {
        name: String,
        hectares: u32,
    }

    #[test]
    fn struct_survives_cbor() {
        let crop = Crop {
            name: "maize".into(),
            hectares: 12,
        };
        let bytes = encode(&crop).unwrap();
        let back: Crop = decode(&bytes).unwrap();
        assert_eq!(back, crop);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result: ProtocolResult<Crop> = decode(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
