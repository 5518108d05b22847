//! Register-init script parsing and encoding.
//!
//! The textual format is a stream of numbers grouped as
//! `base count value...`, terminated by `0 0` (or by end of input on a
//! group boundary). Numbers are decimal, `0x` hex, or `-` decimal;
//! everything else separates them and `#` starts a comment that runs to
//! the end of the line:
//!
//! ```text
//! # squeeze thresholds
//! 0x6C, 3, 0x0100, 0x0200, 0x0300
//! 0x39 1 -1      # wraps to 0xFFFF
//! 0, 0
//! ```
//!
//! The encoded partition is `base, count, value_le16...` per group, a
//! `0, 0` terminator, zero-padded to a multiple of four bytes.

use std::fmt::Write as _;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Script base that addresses the extended register page.
pub const EXTENDED_BASE: i64 = 0x200;
/// On-chip register the extended page is reached through.
pub const EXTENDED_BASE_ALIAS: u8 = 0x82;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Malformed number at byte {offset}")]
    BadNumber { offset: usize },
    #[error("Register base {value:#X} out of range at byte {offset}")]
    BadRegister { value: i64, offset: usize },
    #[error("Register count {value} out of range at byte {offset}")]
    BadCount { value: i64, offset: usize },
    #[error("Register value {value} out of range at byte {offset}")]
    BadValue { value: i64, offset: usize },
    #[error("Register 0x{base:02X} has no values")]
    EmptyGroup { base: u8 },
    #[error("Script ends inside a group")]
    Truncated,
    #[error("Register 0x{base:02X} has {count} values, at most 255 fit")]
    GroupTooLong { base: u8, count: usize },
}

/// One `base count values...` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterGroup {
    pub base: u8,
    pub values: Vec<u16>,
}

impl RegisterGroup {
    pub fn new(base: u8, values: Vec<u16>) -> Self {
        Self { base, values }
    }

    /// Values as they are streamed into the register FIFO.
    pub fn value_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.values.len() * 2];
        LittleEndian::write_u16_into(&self.values, &mut bytes);
        bytes
    }
}

struct Tokens<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Next number and the byte offset it started at.
    fn next_number(&mut self) -> Result<Option<(i64, usize)>, ScriptError> {
        while let Some(c) = self.peek() {
            match c {
                b'#' => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' || c == b'\r' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                b'-' | b'0'..=b'9' => return self.number().map(Some),
                _ => self.pos += 1,
            }
        }
        Ok(None)
    }

    fn number(&mut self) -> Result<(i64, usize), ScriptError> {
        let start = self.pos;
        let bad = ScriptError::BadNumber { offset: start };

        let negative = self.peek() == Some(b'-');
        if negative {
            self.pos += 1;
        }
        if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return Err(bad);
        }

        let hex = self.peek() == Some(b'0')
            && matches!(self.input.get(self.pos + 1), Some(b'x' | b'X'));
        let mut value: u32 = 0;

        if hex {
            if negative {
                return Err(bad);
            }
            self.pos += 2;
            let digits_start = self.pos;
            while let Some(digit) = self.peek().and_then(|c| (c as char).to_digit(16)) {
                value = value
                    .checked_mul(16)
                    .and_then(|v| v.checked_add(digit))
                    .ok_or(bad.clone())?;
                self.pos += 1;
            }
            if self.pos == digits_start {
                return Err(bad);
            }
        } else {
            while let Some(digit) = self.peek().and_then(|c| (c as char).to_digit(10)) {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(digit))
                    .ok_or(bad.clone())?;
                self.pos += 1;
            }
            if matches!(self.peek(), Some(b'x' | b'X')) {
                return Err(bad);
            }
        }

        let value = value as i64;
        Ok((if negative { -value } else { value }, start))
    }
}

fn register_base(value: i64, offset: usize) -> Result<u8, ScriptError> {
    if value == EXTENDED_BASE {
        return Ok(EXTENDED_BASE_ALIAS);
    }
    if (0..0xFF).contains(&value) {
        Ok(value as u8)
    } else {
        Err(ScriptError::BadRegister { value, offset })
    }
}

fn register_value(value: i64, offset: usize) -> Result<u16, ScriptError> {
    if (-0xFFFF..=0xFFFF).contains(&value) {
        // negatives wrap into 16 bits
        Ok(value as i32 as u16)
    } else {
        Err(ScriptError::BadValue { value, offset })
    }
}

/// Parse a textual register script.
///
/// All-or-nothing: an error anywhere rejects the whole script.
pub fn parse(input: &[u8]) -> Result<Vec<RegisterGroup>, ScriptError> {
    let mut tokens = Tokens::new(input);
    let mut groups = Vec::new();

    while let Some((base, base_offset)) = tokens.next_number()? {
        let (count, count_offset) = tokens.next_number()?.ok_or(ScriptError::Truncated)?;
        if base == 0 && count == 0 {
            break;
        }

        let base = register_base(base, base_offset)?;
        if !(0..=0xFF).contains(&count) {
            return Err(ScriptError::BadCount {
                value: count,
                offset: count_offset,
            });
        }
        if count == 0 {
            return Err(ScriptError::EmptyGroup { base });
        }

        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (value, offset) = tokens.next_number()?.ok_or(ScriptError::Truncated)?;
            values.push(register_value(value, offset)?);
        }
        groups.push(RegisterGroup { base, values });
    }

    Ok(groups)
}

/// Encode groups into the on-chip partition layout.
pub fn encode(groups: &[RegisterGroup]) -> Result<Vec<u8>, ScriptError> {
    let mut out = Vec::new();
    for group in groups {
        if group.values.len() > 0xFF {
            return Err(ScriptError::GroupTooLong {
                base: group.base,
                count: group.values.len(),
            });
        }
        out.push(group.base);
        out.push(group.values.len() as u8);
        out.extend_from_slice(&group.value_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    Ok(out)
}

/// Decode an encoded partition back into groups.
pub fn decode(bytes: &[u8]) -> Result<Vec<RegisterGroup>, ScriptError> {
    let mut groups = Vec::new();
    let mut pos = 0;
    loop {
        let (base, count) = match bytes.get(pos..pos + 2) {
            Some(&[base, count]) => (base, count as usize),
            _ => return Err(ScriptError::Truncated),
        };
        pos += 2;
        if base == 0 && count == 0 {
            return Ok(groups);
        }
        if count == 0 {
            return Err(ScriptError::EmptyGroup { base });
        }
        let body = bytes
            .get(pos..pos + count * 2)
            .ok_or(ScriptError::Truncated)?;
        let mut values = vec![0u16; count];
        LittleEndian::read_u16_into(body, &mut values);
        groups.push(RegisterGroup { base, values });
        pos += count * 2;
    }
}

/// Render groups in the textual format accepted by [`parse`].
pub fn format(groups: &[RegisterGroup]) -> String {
    let mut out = String::new();
    for group in groups {
        let _ = write!(out, "0x{:02X}, {}", group.base, group.values.len());
        for value in &group.values {
            let _ = write!(out, ", 0x{:04X}", value);
        }
        out.push('\n');
    }
    out.push_str("0, 0\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_radix_and_comments() {
        let script = b"# header comment\r\n0x6C, 3, 0x0100, 256, 0x0300 # trailing\n0x39 1 -1\n0, 0\n";
        let groups = parse(script).unwrap();
        assert_eq!(
            groups,
            vec![
                RegisterGroup::new(0x6C, vec![0x0100, 0x0100, 0x0300]),
                RegisterGroup::new(0x39, vec![0xFFFF]),
            ]
        );
    }

    #[test]
    fn test_parse_terminator_is_not_a_group() {
        let groups = parse(b"0 0").unwrap();
        assert!(groups.is_empty());

        // Anything after the terminator is ignored, even garbage numbers.
        let groups = parse(b"0x10 1 7\n0 0\n0x999 0x999").unwrap();
        assert_eq!(groups, vec![RegisterGroup::new(0x10, vec![7])]);
    }

    #[test]
    fn test_parse_end_of_input_on_boundary() {
        let groups = parse(b"0x10 2 1 2").unwrap();
        assert_eq!(groups, vec![RegisterGroup::new(0x10, vec![1, 2])]);
    }

    #[test]
    fn test_parse_extended_base_alias() {
        let groups = parse(b"0x200 1 0x1234").unwrap();
        assert_eq!(groups[0].base, EXTENDED_BASE_ALIAS);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(b"0x10 3 1 2"), Err(ScriptError::Truncated));
        assert_eq!(parse(b"0x10"), Err(ScriptError::Truncated));
        assert!(matches!(
            parse(b"0xFF 1 1"),
            Err(ScriptError::BadRegister { value: 0xFF, .. })
        ));
        assert!(matches!(
            parse(b"0x10 256 1"),
            Err(ScriptError::BadCount { value: 256, .. })
        ));
        assert!(matches!(
            parse(b"0x10 1 0x10000"),
            Err(ScriptError::BadValue { value: 0x10000, .. })
        ));
        assert_eq!(
            parse(b"0x10 0"),
            Err(ScriptError::EmptyGroup { base: 0x10 })
        );
        // "0x" with no digits, and an x inside a decimal number
        assert_eq!(parse(b"0x 1"), Err(ScriptError::BadNumber { offset: 0 }));
        assert_eq!(parse(b"12x4 1"), Err(ScriptError::BadNumber { offset: 0 }));
        assert!(matches!(parse(b"-0x10 1"), Err(ScriptError::BadNumber { .. })));
        assert!(matches!(parse(b"- 1"), Err(ScriptError::BadNumber { .. })));
        assert!(matches!(
            parse(b"99999999999 1"),
            Err(ScriptError::BadNumber { .. })
        ));
    }

    #[test]
    fn test_encode_layout_and_padding() {
        let groups = vec![RegisterGroup::new(0x6C, vec![0x1234])];
        let bytes = encode(&groups).unwrap();
        // base, count, lo, hi, 0, 0 -> padded to 8
        assert_eq!(bytes, vec![0x6C, 1, 0x34, 0x12, 0, 0, 0, 0]);

        let groups = vec![RegisterGroup::new(0x10, vec![1, 2, 3])];
        let bytes = encode(&groups).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[8..10], &[0, 0]);

        assert_eq!(encode(&[]).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_rejects_long_group() {
        let groups = vec![RegisterGroup::new(0x10, vec![0; 256])];
        assert_eq!(
            encode(&groups),
            Err(ScriptError::GroupTooLong {
                base: 0x10,
                count: 256
            })
        );
    }

    #[test]
    fn test_text_and_partition_round_trip() {
        let groups = vec![
            RegisterGroup::new(0x00, vec![0x0001]),
            RegisterGroup::new(0x39, vec![0xFFFF, 0x0000, 0x8000]),
            RegisterGroup::new(0x82, (0..255).collect()),
            RegisterGroup::new(0xFE, vec![42]),
        ];
        let text = format(&groups);
        assert_eq!(parse(text.as_bytes()).unwrap(), groups);

        let partition = encode(&groups).unwrap();
        assert_eq!(partition.len() % 4, 0);
        assert_eq!(decode(&partition).unwrap(), groups);
    }

    #[test]
    fn test_decode_requires_terminator() {
        assert_eq!(decode(&[0x10, 1, 0x01, 0x00]), Err(ScriptError::Truncated));
        assert_eq!(decode(&[0x10, 2, 0x01]), Err(ScriptError::Truncated));
    }

    #[test]
    fn test_value_bytes_little_endian() {
        let group = RegisterGroup::new(0x20, vec![0x0102, 0xA0B0]);
        assert_eq!(group.value_bytes(), vec![0x02, 0x01, 0xB0, 0xA0]);
    }
}
