//! Transaction identity
//!
//! The CLI writes transactions as a JSON text envelope whose `cborHex` field
//! holds the CBOR payload. A signed transaction is a CBOR array whose first
//! element is the body; the id is the blake2b-256 digest of exactly those
//! body bytes, so witnesses never change it.

use std::fmt;
use std::io::Cursor;

use cbor_event::de::Deserializer;
use cbor_event::{Type, Value};
use cryptoxide::blake2b::Blake2b;
use cryptoxide::digest::Digest;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ToolkitError};

/// Text envelope written by `build-raw` and `sign`
#[derive(Debug, Clone, Deserialize)]
pub struct TextEnvelope {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "cborHex")]
    pub cbor_hex: String,
}

impl TextEnvelope {
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| ToolkitError::parse(format!("failed to get tx id: {}", e)))
    }

    pub fn cbor(&self) -> Result<Vec<u8>> {
        hex::decode(self.cbor_hex.trim())
            .map_err(|e| ToolkitError::parse(format!("failed to decode cbor hex: {}", e)))
    }
}

/// A transaction identified by its body hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tx {
    pub id: String,
}

impl Tx {
    /// Derive the id from a (signed or unsigned) envelope
    pub fn from_envelope(data: &[u8]) -> Result<Self> {
        let cbor = TextEnvelope::parse(data)?.cbor()?;
        let body = body_bytes(&cbor)?;
        Ok(Self {
            id: hex::encode(blake2b_256(body)),
        })
    }
}

impl fmt::Display for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

fn cbor_err(e: cbor_event::Error) -> ToolkitError {
    ToolkitError::parse(format!("malformed transaction cbor: {}", e))
}

/// Slice out the canonical body encoding
///
/// Arrays yield their first element. A bare map is already the body.
pub fn body_bytes(cbor: &[u8]) -> Result<&[u8]> {
    let mut raw = Deserializer::from(Cursor::new(cbor));
    match raw.cbor_type().map_err(cbor_err)? {
        Type::Array => {
            raw.array().map_err(cbor_err)?;
            let start = raw.as_ref().position() as usize;
            raw.deserialize::<Value>().map_err(cbor_err)?;
            let end = raw.as_ref().position() as usize;
            Ok(&cbor[start..end])
        }
        Type::Map => Ok(cbor),
        other => Err(ToolkitError::parse(format!(
            "unexpected transaction cbor type: {:?}",
            other
        ))),
    }
}

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::new(32);
    hasher.input(data);
    let mut out = [0u8; 32];
    hasher.result(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // [ {0: [], 2: 0}, {}, true, null ]
    const SIGNED: &str = "84a20080020aa0f5f6";
    const BODY: &str = "a20080020a";

    fn envelope(cbor_hex: &str) -> Vec<u8> {
        format!(
            r#"{{"type":"Tx AlonzoEra","description":"","cborHex":"{}"}}"#,
            cbor_hex
        )
        .into_bytes()
    }

    #[test]
    fn test_body_of_array() {
        let cbor = hex::decode(SIGNED).unwrap();
        assert_eq!(hex::encode(body_bytes(&cbor).unwrap()), BODY);
    }

    #[test]
    fn test_bare_body_map_is_hashed_whole() {
        let cbor = hex::decode(BODY).unwrap();
        assert_eq!(body_bytes(&cbor).unwrap(), &cbor[..]);
    }

    #[test]
    fn test_id_ignores_witnesses() {
        let a = Tx::from_envelope(&envelope(SIGNED)).unwrap();
        // same body, one witness set entry
        let b = Tx::from_envelope(&envelope("84a20080020aa10080f5f6")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id, hex::encode(blake2b_256(&hex::decode(BODY).unwrap())));
        assert_eq!(a.id.len(), 64);

        // fee 11 instead of 10
        let c = Tx::from_envelope(&envelope("84a20080020ba0f5f6")).unwrap();
        assert_ne!(a, c);
    }

    // One input, two Shelley enterprise outputs, fee 171573, ttl 43500000,
    // one vkey witness. Digests computed with an independent blake2b-256.
    const ALONZO_SIGNED: &str = concat!(
        "84a400818258204ae5e44731364775776277d16a5a600f86714acaa760fde76ccb8c3be5227c8a01",
        "018282581d6066fa9f9d3186b9c13a66b004fc8bb5f3359c4deb17197266895fb8d31b0000001748",
        "65078b82581d6034a04005bcaf206eec990bd9637d9fdb6725e0a0c0d4aebf003f17f41a000f4240",
        "021a00029e35031a0297c1e0a10081825820293c986801ae42008c98b5f0815ed335651cbb1a8c36",
        "ef62fa28de09df9c8bec58400073ec266d4fb4adbf3d104aa714f9f11032fd8ab6d8829fc40b52c8",
        "6f6485d7928cc2ebd4646f3fe3f374be11d905bf4be275fa86f3889d82a9f7dc5e41dd32f5f6",
    );
    const ALONZO_TX_ID: &str = "f87736478cb0db79b85f02aba65f8043a79763652c6cb8d8ac97b11f6163cebe";
    // blake2b-256 of the whole signed payload, which must not be the id
    const ALONZO_WHOLE_DIGEST: &str =
        "b6568f848758a63f096e5f7af7c563e1d731f7db9a46529f4549d2761304fbf5";

    #[test]
    fn test_signed_alonzo_tx_has_known_id() {
        let tx = Tx::from_envelope(&envelope(ALONZO_SIGNED)).unwrap();
        assert_eq!(tx.id, ALONZO_TX_ID);
        assert_ne!(tx.id, ALONZO_WHOLE_DIGEST);

        let cbor = hex::decode(ALONZO_SIGNED).unwrap();
        let body = body_bytes(&cbor).unwrap();
        assert_eq!(body.len(), 131);
        assert_eq!(hex::encode(blake2b_256(&cbor)), ALONZO_WHOLE_DIGEST);
    }

    #[test]
    fn test_blake2b_known_vector() {
        assert_eq!(
            hex::encode(blake2b_256(b"")),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }

    #[test]
    fn test_malformed_envelopes() {
        assert!(Tx::from_envelope(b"not json").is_err());
        assert!(Tx::from_envelope(&envelope("zz")).is_err());
        assert!(Tx::from_envelope(&envelope("01")).is_err());
        // truncated array
        assert!(Tx::from_envelope(&envelope("84a200")).is_err());
    }
}
