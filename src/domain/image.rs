use base64::{engine::general_purpose::STANDARD, Engine as _};

#[derive(Debug, thiserror::Error)]
pub enum ImageDecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64 image: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decode a Base64 photo payload, with or without a `data:` URI prefix
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, ImageDecodeError> {
    let trimmed = encoded.trim();
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => trimmed,
    };

    // Senders may wrap long payloads
    let body: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if body.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    Ok(STANDARD.decode(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_base64() {
        assert_eq!(decode_image("/9j/4A==").unwrap(), vec![0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[test]
    fn test_data_uri_and_line_breaks() {
        let bytes = decode_image("data:image/jpeg;base64,/9j/\n4A==").unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        assert!(matches!(decode_image("  "), Err(ImageDecodeError::Empty)));
        assert!(matches!(
            decode_image("data:image/jpeg;base64,"),
            Err(ImageDecodeError::Empty)
        ));
        assert!(matches!(
            decode_image("not*base64"),
            Err(ImageDecodeError::Base64(_))
        ));
    }
}
