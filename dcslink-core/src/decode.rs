//! Per-field value decoders.
//!
//! Exactly two kinds exist in the schema format, so this is a closed enum
//! rather than a trait: masked/shifted integer extraction, and multi-word
//! string accumulation. Both are pure value transitions over the words
//! routed to them by the assembler.

/// Stateful decoder for one field.
#[derive(Debug, Clone)]
pub enum FieldDecoder {
    Integer(IntegerDecoder),
    Text(TextDecoder),
}

impl FieldDecoder {
    /// Apply one write event addressed to this decoder.
    pub fn apply(&mut self, address: u16, word: u16) {
        match self {
            FieldDecoder::Integer(d) => d.apply(word),
            FieldDecoder::Text(d) => d.apply(address, word),
        }
    }
}

// ---------------------------------------------------------------------------
// Integer decoder
// ---------------------------------------------------------------------------

/// Extracts `(word & mask) >> shift` from every word written to its address.
///
/// The value is stored on every update, not only on change — downstream
/// notification intentionally re-fires on repeated identical writes.
#[derive(Debug, Clone)]
pub struct IntegerDecoder {
    mask: u16,
    shift: u8,
    value: Option<u16>,
}

impl IntegerDecoder {
    pub fn new(mask: u16, shift: u8) -> Self {
        IntegerDecoder {
            mask,
            shift,
            value: None,
        }
    }

    pub fn apply(&mut self, word: u16) {
        self.value = Some((word & self.mask) >> self.shift);
    }

    /// Last extracted value; `None` until the first word arrives.
    pub fn value(&self) -> Option<u16> {
        self.value
    }
}

// ---------------------------------------------------------------------------
// Text decoder
// ---------------------------------------------------------------------------

/// Accumulates a fixed-length byte buffer from words written across a span
/// of addresses.
///
/// Each word carries two bytes at `address - base` and the following slot.
/// The decoded string only becomes available once every slot has been
/// written at least once; the buffer is never resized and never cleared, so
/// later words overwrite bytes in place across frames.
#[derive(Debug, Clone)]
pub struct TextDecoder {
    base: u16,
    buffer: Vec<u8>,
    filled: Vec<bool>,
    value: Option<String>,
}

impl TextDecoder {
    pub fn new(base: u16, length: usize) -> Self {
        TextDecoder {
            base,
            buffer: vec![0; length],
            filled: vec![false; length],
            value: None,
        }
    }

    /// True once every byte slot has been written at least once.
    pub fn is_complete(&self) -> bool {
        self.filled.iter().all(|&f| f)
    }

    /// Write a byte if the slot is in bounds. Returns true when this write
    /// landed in the final slot.
    fn set_byte(&mut self, index: i32, byte: u8) -> bool {
        if index >= 0 && (index as usize) < self.buffer.len() {
            let index = index as usize;
            self.buffer[index] = byte;
            self.filled[index] = true;
            return index + 1 == self.buffer.len();
        }
        false
    }

    pub fn apply(&mut self, address: u16, word: u16) {
        // Signed offset: a word at base-1 still carries this field's first
        // byte in its high half.
        let offset = address as i32 - self.base as i32;
        let low = (word & 0xFF) as u8;
        let high = (word >> 8) as u8;

        let done = self.set_byte(offset, low);
        if !done {
            self.set_byte(offset + 1, high);
        }

        if self.is_complete() {
            self.value = Some(utf8_dropping_invalid(&self.buffer));
        }
    }

    /// Decoded string, untrimmed. `None` until the buffer first completes.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Decode UTF-8, dropping invalid sequences instead of replacing them.
fn utf8_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                out.push_str(s);
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&bytes[..valid]));
                let skip = e.error_len().unwrap_or(bytes.len() - valid);
                bytes = &bytes[valid + skip..];
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_mask_and_shift() {
        let mut d = IntegerDecoder::new(0x0070, 4);
        assert_eq!(d.value(), None);

        d.apply(0b0101_0000);
        assert_eq!(d.value(), Some(0b101));
    }

    #[test]
    fn test_integer_single_bit_mask() {
        let mut d = IntegerDecoder::new(0x0001, 0);
        d.apply(0x0007);
        assert_eq!(d.value(), Some(1));
    }

    #[test]
    fn test_integer_stores_every_update() {
        let mut d = IntegerDecoder::new(0xFFFF, 0);
        d.apply(5);
        d.apply(5);
        assert_eq!(d.value(), Some(5));
        d.apply(9);
        assert_eq!(d.value(), Some(9));
    }

    #[test]
    fn test_integer_full_range() {
        let mut d = IntegerDecoder::new(0xFF00, 8);
        d.apply(0xAB12);
        assert_eq!(d.value(), Some(0xAB));
    }

    #[test]
    fn test_text_incomplete_until_all_bytes_written() {
        let mut d = TextDecoder::new(0x1000, 4);
        d.apply(0x1000, u16::from_le_bytes([b'A', b'B']));
        assert!(!d.is_complete());
        assert_eq!(d.value(), None);

        d.apply(0x1002, u16::from_le_bytes([b'C', b'D']));
        assert!(d.is_complete());
        assert_eq!(d.value(), Some("ABCD"));
    }

    #[test]
    fn test_text_length_before_trimming() {
        let mut d = TextDecoder::new(0x1000, 4);
        d.apply(0x1000, u16::from_le_bytes([b'A', 0x00]));
        d.apply(0x1002, u16::from_le_bytes([b'B', 0x00]));
        // All 4 slots filled; value spans the full buffer, nulls included.
        assert_eq!(d.value(), Some("A\0B\0"));
    }

    #[test]
    fn test_text_overwrites_in_place() {
        let mut d = TextDecoder::new(0x2000, 2);
        d.apply(0x2000, u16::from_le_bytes([b'O', b'K']));
        assert_eq!(d.value(), Some("OK"));

        d.apply(0x2000, u16::from_le_bytes([b'N', b'O']));
        assert_eq!(d.value(), Some("NO"));
    }

    #[test]
    fn test_text_out_of_range_word_ignored() {
        let mut d = TextDecoder::new(0x1000, 2);
        d.apply(0x2000, 0x4141); // not this field's span
        assert!(!d.is_complete());

        d.apply(0x1000, u16::from_le_bytes([b'H', b'I']));
        assert_eq!(d.value(), Some("HI"));
    }

    #[test]
    fn test_text_word_straddling_buffer_end() {
        // Odd length: the final word's high byte falls past the buffer and
        // is dropped without disturbing the rest.
        let mut d = TextDecoder::new(0x1000, 3);
        d.apply(0x1000, u16::from_le_bytes([b'A', b'B']));
        d.apply(0x1002, u16::from_le_bytes([b'C', b'X']));
        assert_eq!(d.value(), Some("ABC"));
    }

    #[test]
    fn test_text_word_before_base() {
        // A word one address below base carries byte 0 in its high half.
        let mut d = TextDecoder::new(0x1001, 2);
        d.apply(0x1000, u16::from_le_bytes([b'?', b'A']));
        d.apply(0x1002, u16::from_le_bytes([b'B', b'?']));
        assert_eq!(d.value(), Some("AB"));
    }

    #[test]
    fn test_text_invalid_utf8_dropped() {
        let mut d = TextDecoder::new(0x1000, 4);
        d.apply(0x1000, u16::from_le_bytes([b'A', 0xFF]));
        d.apply(0x1002, u16::from_le_bytes([0xFE, b'B']));
        assert_eq!(d.value(), Some("AB"));
    }

    #[test]
    fn test_utf8_dropping_invalid_multibyte() {
        // Valid two-byte sequence survives; a lone continuation byte is
        // dropped.
        let bytes = [0xC3, 0xA9, 0x80, b'x']; // "é", stray 0x80, "x"
        assert_eq!(utf8_dropping_invalid(&bytes), "éx");
    }

    #[test]
    fn test_field_decoder_dispatch() {
        let mut d = FieldDecoder::Integer(IntegerDecoder::new(0xFFFF, 0));
        d.apply(0x0000, 42);
        match d {
            FieldDecoder::Integer(i) => assert_eq!(i.value(), Some(42)),
            FieldDecoder::Text(_) => unreachable!(),
        }
    }
}
