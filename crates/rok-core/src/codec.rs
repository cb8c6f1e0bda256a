//! Blob codecs: how request/response values cross the `TEXT` columns.
//!
//! The coordinator never interprets blobs — it only moves them between the
//! store and the caller's codec. [`JsonCodec`] is the default; callers with
//! other wire formats implement [`BlobCodec`] themselves.

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("blob encode failed")]
    Encode(#[source] anyhow::Error),
    #[error("blob decode failed")]
    Decode(#[source] anyhow::Error),
}

/// Converts a value to and from its stored blob representation.
///
/// `decode(encode(v))` must reproduce a value equal to `v` for every value the
/// caller's handlers produce — replay correctness rests on it.
pub trait BlobCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<String, CodecError>;
    fn decode(&self, blob: &str) -> Result<T, CodecError>;
}

/// serde_json-backed [`BlobCodec`] for any serde type.
///
/// `None` encodes as the explicit JSON `null` and round-trips as such, so a
/// persistent request with an absent preprocessed value is still a present
/// blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> BlobCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Encode(e.into()))
    }

    fn decode(&self, blob: &str) -> Result<T, CodecError> {
        serde_json::from_str(blob).map_err(|e| CodecError::Decode(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payment {
        account: String,
        cents: i64,
    }

    #[test]
    fn struct_round_trip() {
        let codec = JsonCodec;
        let value = Payment {
            account: "acct-9".into(),
            cents: 1250,
        };
        let blob = codec.encode(&value).unwrap();
        let back: Payment = codec.decode(&blob).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn absent_value_is_an_explicit_null_blob() {
        let codec = JsonCodec;
        let blob = codec.encode(&None::<Payment>).unwrap();
        assert_eq!(blob, "null");
        let back: Option<Payment> = codec.decode(&blob).unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn garbage_blob_is_a_decode_error() {
        let codec = JsonCodec;
        let err = <JsonCodec as BlobCodec<Payment>>::decode(&codec, "{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
