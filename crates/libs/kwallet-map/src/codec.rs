use crate::error::CodecError;

/// Key field marking an entry whose key and value are both empty. The value
/// field that follows it carries the same bytes.
pub const EMPTY_ENTRY: [u8; 4] = [0xFF; 4];

/// Value field marking an empty value.
pub const EMPTY_VALUE: [u8; 4] = [0x00; 4];

const MAX_TEXT_UNITS: usize = (i32::MAX / 2) as usize;

/// Encodes string pairs into the kwalletd map layout, preserving order.
///
/// An empty slice encodes to an empty blob, which kwalletd reads back as an
/// empty map.
pub fn encode(entries: &[(String, String)]) -> Result<Vec<u8>, CodecError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let count = i32::try_from(entries.len())
        .map_err(|_| CodecError::TooLarge { what: "map", units: entries.len() })?;

    let mut out = Vec::with_capacity(4 + entries.len() * 16);
    out.extend_from_slice(&count.to_be_bytes());
    for (key, value) in entries {
        if key.is_empty() && value.is_empty() {
            out.extend_from_slice(&EMPTY_ENTRY);
            out.extend_from_slice(&EMPTY_ENTRY);
            continue;
        }
        write_text(&mut out, "key", key)?;
        if value.is_empty() {
            out.extend_from_slice(&EMPTY_VALUE);
        } else {
            write_text(&mut out, "value", value)?;
        }
    }
    Ok(out)
}

/// Decodes a kwalletd map blob into ordered string pairs.
///
/// A zero-length blob is an empty map. A key seen twice keeps its first
/// position and takes the later value.
pub fn decode(bytes: &[u8]) -> Result<Vec<(String, String)>, CodecError> {
    let mut entries: Vec<(String, String)> = Vec::new();
    if bytes.is_empty() {
        return Ok(entries);
    }

    let mut reader = Reader::new(bytes);
    let count = i32::from_be_bytes(reader.take_field()?);
    // kwalletd never writes a negative count; treat it like an empty map.
    for _ in 0..count.max(0) {
        let key_field = reader.take_field()?;
        if key_field == EMPTY_ENTRY {
            reader.take_field()?;
            upsert(&mut entries, String::new(), String::new());
            continue;
        }
        let key = reader.take_text(key_field)?;

        let value_field = reader.take_field()?;
        let value =
            if value_field == EMPTY_VALUE { String::new() } else { reader.take_text(value_field)? };
        upsert(&mut entries, key, value);
    }
    Ok(entries)
}

fn write_text(out: &mut Vec<u8>, what: &'static str, text: &str) -> Result<(), CodecError> {
    let units: Vec<u16> = text.encode_utf16().collect();
    if units.len() > MAX_TEXT_UNITS {
        return Err(CodecError::TooLarge { what, units: units.len() });
    }
    let byte_len = (units.len() * 2) as i32;
    out.extend_from_slice(&byte_len.to_be_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    Ok(())
}

fn upsert(entries: &mut Vec<(String, String)>, key: String, value: String) {
    match entries.iter_mut().find(|(existing, _)| *existing == key) {
        Some(slot) => slot.1 = value,
        None => entries.push((key, value)),
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let available = self.bytes.len() - self.offset;
        if needed > available {
            return Err(CodecError::Truncated { offset: self.offset, needed, available });
        }
        let slice = &self.bytes[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn take_field(&mut self) -> Result<[u8; 4], CodecError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(raw)
    }

    /// Reads the text announced by a length field. Odd byte lengths drop the
    /// trailing byte's code unit, as kwalletd's own reader does.
    fn take_text(&mut self, length_field: [u8; 4]) -> Result<String, CodecError> {
        let length = i32::from_be_bytes(length_field);
        if length < 0 {
            return Err(CodecError::InvalidLength { offset: self.offset - 4, length });
        }
        let units = (length / 2) as usize;
        let start = self.offset;
        let raw = self.take(units * 2)?;
        let decoded: Vec<u16> =
            raw.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect();
        String::from_utf16(&decoded).map_err(|_| CodecError::InvalidUtf16 { offset: start })
    }
}
