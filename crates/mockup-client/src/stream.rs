//! UTF-8 decoding of a chunked byte stream.

/// Decodes byte chunks into text, carrying an incomplete trailing code
/// point over to the next chunk.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);

        let valid = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            // Only an incomplete sequence at the very end is held back.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                let text = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                return text;
            }
        };

        let rest = self.carry.split_off(valid);
        let head = std::mem::replace(&mut self.carry, rest);
        String::from_utf8_lossy(&head).into_owned()
    }

    /// Flush whatever is left; a truncated sequence becomes U+FFFD.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_code_point_is_carried() {
        let bytes = "héllo ✓".as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for b in bytes {
            out.push_str(&decoder.push(std::slice::from_ref(b)));
        }
        assert_eq!(out, "héllo ✓");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_truncated_tail_is_replaced_on_finish() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.push(&[b'a', 0xE2, 0x9C]), "a");
        assert_eq!(decoder.finish().as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn test_invalid_bytes_do_not_stall() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.push(&[0xFF, b'x']), "\u{FFFD}x");
    }
}
