//! Permissive text decoding for blob content.
//!
//! Stored text is UTF-8, but imported documents arrive in whatever encoding
//! their source used. Decode order: UTF-8, then GBK, then Latin-1, then
//! lossy UTF-8.

/// Decode bytes to text without failing.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let (decoded, _, had_errors) = encoding_rs::GBK.decode(bytes);
    if !had_errors {
        return decoded.into_owned();
    }

    let (decoded, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    if !had_errors {
        return decoded.into_owned();
    }

    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough() {
        assert_eq!(decode_text("héllo wörld".as_bytes()), "héllo wörld");
    }

    #[test]
    fn test_gbk_fallback() {
        // "中文" encoded as GBK.
        let gbk_bytes = [0xd6, 0xd0, 0xce, 0xc4];
        assert_eq!(decode_text(&gbk_bytes), "中文");
    }

    #[test]
    fn test_never_fails() {
        let garbage = [0xff, 0xfe, 0x00, 0x81];
        let decoded = decode_text(&garbage);
        assert!(!decoded.is_empty());
    }
}
