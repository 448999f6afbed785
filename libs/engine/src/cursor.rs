//! Opaque pagination tokens.
//!
//! A token is the URL-safe, unpadded base64 of `{"created_at":<ms>,"id":<n>}`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use sensor_api::PageKey;

use crate::error::CursorError;

pub fn encode(key: PageKey) -> String {
    let payload = serde_json::json!({
        "created_at": key.created_at_ms,
        "id": key.id,
    });
    URL_SAFE_NO_PAD.encode(payload.to_string())
}

pub fn decode(token: &str) -> Result<PageKey, CursorError> {
    let bytes = URL_SAFE_NO_PAD.decode(token)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_stable() {
        let token = encode(PageKey { created_at_ms: 1_700_000_000_000, id: 42 });
        assert_eq!(token, encode(PageKey { created_at_ms: 1_700_000_000_000, id: 42 }));
        assert!(!token.contains('='));
        let raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        assert_eq!(raw, br#"{"created_at":1700000000000,"id":42}"#);
    }

    #[test]
    fn decode_tells_encoding_from_payload() {
        assert!(matches!(decode("%%%"), Err(CursorError::Encoding(_))));

        let not_json = URL_SAFE_NO_PAD.encode("hello");
        assert!(matches!(decode(&not_json), Err(CursorError::Payload(_))));

        let wrong_shape = URL_SAFE_NO_PAD.encode(r#"{"created_at":"x","id":1}"#);
        assert!(matches!(decode(&wrong_shape), Err(CursorError::Payload(_))));
    }

    #[test]
    fn decode_accepts_negative_values() {
        let key = PageKey { created_at_ms: -5, id: -1 };
        assert_eq!(decode(&encode(key)).unwrap(), key);
    }
}
