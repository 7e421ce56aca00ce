//! ACME 全程使用的 base64url（無填充）編碼工具。

use ::base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

/// Base64url 解碼失敗時的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64url input: {0}")]
    Invalid(String),
}

/// 將任意位元組編碼為不含 `=` 填充的 base64url 字串。
///
/// # 示例
///
/// ```
/// use acme_dns01::base64::url_encode;
/// assert_eq!(url_encode("Hello, World!"), "SGVsbG8sIFdvcmxkIQ");
/// ```
pub fn url_encode<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input.as_ref())
}

/// 解碼 base64url 字串；容忍尾端多餘的 `=`。
pub fn url_decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| DecodeError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_encoding() {
        assert_eq!(url_encode("Hello, World!"), "SGVsbG8sIFdvcmxkIQ");
    }

    #[test]
    fn test_url_safe_alphabet() {
        let encoded = url_encode([0xFB, 0xFF, 0xBF]);
        assert_eq!(encoded, "-_-_");
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn test_padding_stripped() {
        assert_eq!(url_encode("a"), "YQ");
        assert_eq!(url_encode("ab"), "YWI");
        assert_eq!(url_encode("abc"), "YWJj");
    }

    #[test]
    fn test_decode_accepts_padded_input() {
        assert_eq!(url_decode("YQ==").unwrap(), b"a");
        assert_eq!(url_decode("SGVsbG8sIFdvcmxkIQ").unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_invalid_char() {
        assert!(matches!(url_decode("SGVs$G8"), Err(DecodeError::Invalid(_))));
    }
}
