//! `FabricAddress`: an opaque byte sequence identifying an endpoint on a
//! fabric, with a base64 round-trip for out-of-band exchange.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mxl_status::{MxlError, Result, StatusCode};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FabricAddress(Vec<u8>);

impl FabricAddress {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Rejects both malformed base64 and a successfully-decoded but
    /// empty address; an address identifies exactly one endpoint.
    pub fn from_base64(data: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| MxlError::with_source(StatusCode::InvalidArg, "malformed fabric address", e))?;
        if bytes.is_empty() {
            return Err(MxlError::new(StatusCode::InvalidArg, "empty fabric address"));
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64() {
        let addr = FabricAddress::new(b"127.0.0.1:4242".to_vec());
        let encoded = addr.to_base64();
        assert_eq!(FabricAddress::from_base64(&encoded).unwrap(), addr);
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(FabricAddress::from_base64("not valid base64!!").is_err());
    }

    #[test]
    fn rejects_empty_address() {
        let encoded = STANDARD.encode([]);
        assert_eq!(FabricAddress::from_base64(&encoded).unwrap_err().code, StatusCode::InvalidArg);
    }
}
