// We define in our crate:
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::PublicKey;
use ed25519_dalek::Signature;
use rsa::RSAPublicKey;
use std::borrow::Cow;
use std::convert::TryInto;

pub use hex_buffer_serde::Hex;

// a single-purpose type for use in `#[serde(with)]`
pub enum EdPublicKeyHex {}

impl Hex<PublicKey> for EdPublicKeyHex {
    type Error = String;

    fn create_bytes(public_key: &PublicKey) -> Cow<[u8]> {
        public_key.as_ref().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<PublicKey, String> {
        PublicKey::from_bytes(bytes).map_err(|e| format!("{}", e))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum EdSignatureHex {}

impl Hex<Signature> for EdSignatureHex {
    type Error = String;

    fn create_bytes(sig: &Signature) -> Cow<[u8]> {
        let bytes = sig.to_bytes().to_vec();
        Cow::from(bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Signature, String> {
        Signature::from_bytes(bytes).map_err(|e| format!("{}", e))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum RSAPublicKeyHex {}

impl Hex<RSAPublicKey> for RSAPublicKeyHex {
    type Error = String;

    fn create_bytes(public_key: &RSAPublicKey) -> Cow<[u8]> {
        serde_cbor::to_vec(public_key).unwrap().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<RSAPublicKey, String> {
        serde_cbor::from_slice(bytes).map_err(|e| format!("{}", e))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum Bytes32Hex {}

impl Hex<[u8; 32]> for Bytes32Hex {
    type Error = String;

    fn create_bytes(bytes: &[u8; 32]) -> Cow<[u8]> {
        bytes.to_vec().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<[u8; 32], String> {
        bytes
            .try_into()
            .map_err(|_| "expected 32 bytes".to_string())
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum Bytes12Hex {}

impl Hex<[u8; 12]> for Bytes12Hex {
    type Error = String;

    fn create_bytes(bytes: &[u8; 12]) -> Cow<[u8]> {
        bytes.to_vec().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<[u8; 12], String> {
        bytes
            .try_into()
            .map_err(|_| "expected 12 bytes".to_string())
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum ScalarHex {}

impl Hex<Scalar> for ScalarHex {
    type Error = String;

    fn create_bytes(scalar: &Scalar) -> Cow<[u8]> {
        scalar.as_bytes().to_vec().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Scalar, String> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "scalar must be 32 bytes".to_string())?;
        Scalar::from_canonical_bytes(bytes).ok_or_else(|| "non-canonical scalar".to_string())
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum PointHex {}

impl Hex<CompressedEdwardsY> for PointHex {
    type Error = String;

    fn create_bytes(point: &CompressedEdwardsY) -> Cow<[u8]> {
        point.as_bytes().to_vec().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<CompressedEdwardsY, String> {
        if bytes.len() != 32 {
            return Err("point must be 32 bytes".to_string());
        }
        let point = CompressedEdwardsY::from_slice(bytes);
        if point.decompress().is_none() {
            return Err("point does not decompress".to_string());
        }
        Ok(point)
    }
}
