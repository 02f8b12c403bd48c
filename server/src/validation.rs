use serde_json::Value;

use crate::error::ApiError;

/// Maximum prompt length accepted by the relay
pub const MAX_TEXT_LENGTH: usize = 5000;

/// Validate a raw `POST /stream` body and extract the prompt.
///
/// The body must be a JSON object whose `text` field is a non-empty string of
/// at most [`MAX_TEXT_LENGTH`] characters.
pub fn validate_stream_request(body: &[u8]) -> Result<String, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidInput(format!("Malformed JSON body: {}", e)))?;

    let text = match value.get("text") {
        Some(Value::String(text)) => text,
        Some(_) => return Err(ApiError::InvalidInput("Field `text` must be a string".to_string())),
        None => return Err(ApiError::InvalidInput("Missing field `text`".to_string())),
    };

    if text.is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    Ok(text.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(body: &str) -> String {
        match validate_stream_request(body.as_bytes()) {
            Err(ApiError::InvalidInput(msg)) => msg,
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_stream_request_valid() {
        assert_eq!(
            validate_stream_request(br#"{"text":"Tell me a joke."}"#).unwrap(),
            "Tell me a joke."
        );
        // Unknown fields are ignored.
        assert!(validate_stream_request(br#"{"text":"Hi","lang":"en"}"#).is_ok());
    }

    #[test]
    fn test_validate_stream_request_empty_text() {
        assert!(reason(r#"{"text":""}"#).contains("empty"));
    }

    #[test]
    fn test_validate_stream_request_missing_or_wrong_type() {
        assert!(reason(r#"{}"#).contains("Missing"));
        assert!(reason(r#"{"text":42}"#).contains("string"));
        assert!(reason(r#"{"text":null}"#).contains("string"));
        assert!(reason(r#"["text"]"#).contains("Missing"));
    }

    #[test]
    fn test_validate_stream_request_malformed() {
        assert!(reason("{not json").contains("Malformed"));
        assert!(reason("").contains("Malformed"));
    }

    #[test]
    fn test_validate_stream_request_too_long() {
        let long_text = "a".repeat(6000);
        let body = serde_json::json!({ "text": long_text }).to_string();
        assert!(reason(&body).contains("too long"));

        let limit = "a".repeat(MAX_TEXT_LENGTH);
        let body = serde_json::json!({ "text": limit }).to_string();
        assert!(validate_stream_request(body.as_bytes()).is_ok());
    }
}
