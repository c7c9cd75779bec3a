use anyhow::{Result, bail};

// NDN packet format v0.3 TLV types used by this crate.
pub const TLV_INTEREST: u64 = 5;
pub const TLV_DATA: u64 = 6;
pub const TLV_NAME: u64 = 7;
pub const TLV_GENERIC_COMPONENT: u64 = 8;
pub const TLV_IMPLICIT_DIGEST_COMPONENT: u64 = 1;
pub const TLV_SEGMENT_COMPONENT: u64 = 50;
pub const TLV_INTEREST_LIFETIME: u64 = 12;
pub const TLV_FORWARDING_HINT: u64 = 30;
pub const TLV_CONTENT: u64 = 21;
pub const TLV_SIGNATURE_INFO: u64 = 22;
pub const TLV_SIGNATURE_VALUE: u64 = 23;
pub const TLV_SIGNATURE_TYPE: u64 = 27;
pub const TLV_KEY_LOCATOR: u64 = 28;

pub fn write_var_number(out: &mut Vec<u8>, v: u64) {
    if v < 253 {
        out.push(v as u8);
    } else if v <= u64::from(u16::MAX) {
        out.push(253);
        out.extend_from_slice(&(v as u16).to_be_bytes());
    } else if v <= u64::from(u32::MAX) {
        out.push(254);
        out.extend_from_slice(&(v as u32).to_be_bytes());
    } else {
        out.push(255);
        out.extend_from_slice(&v.to_be_bytes());
    }
}

pub fn write_tlv(out: &mut Vec<u8>, typ: u64, value: &[u8]) {
    write_var_number(out, typ);
    write_var_number(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Shortest-form non-negative integer encoding (1, 2, 4 or 8 bytes, big-endian).
pub fn write_nonneg_integer(out: &mut Vec<u8>, typ: u64, v: u64) {
    let mut buf = Vec::with_capacity(8);
    if v <= u64::from(u8::MAX) {
        buf.push(v as u8);
    } else if v <= u64::from(u16::MAX) {
        buf.extend_from_slice(&(v as u16).to_be_bytes());
    } else if v <= u64::from(u32::MAX) {
        buf.extend_from_slice(&(v as u32).to_be_bytes());
    } else {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    write_tlv(out, typ, &buf);
}

pub fn decode_nonneg_integer(value: &[u8]) -> Result<u64> {
    match value.len() {
        1 => Ok(u64::from(value[0])),
        2 => Ok(u64::from(u16::from_be_bytes(value.try_into().unwrap()))),
        4 => Ok(u64::from(u32::from_be_bytes(value.try_into().unwrap()))),
        8 => Ok(u64::from_be_bytes(value.try_into().unwrap())),
        n => bail!("invalid non-negative integer length: {n}"),
    }
}

/// Bounds-checked TLV cursor over a byte slice.
pub struct Reader<'a> {
    b: &'a [u8],
    i: usize,
}

impl<'a> Reader<'a> {
    pub fn new(b: &'a [u8]) -> Self {
        Self { b, i: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.i >= self.b.len()
    }

    pub fn position(&self) -> usize {
        self.i
    }

    fn read_u8(&mut self) -> Result<u8> {
        let v = *self
            .b
            .get(self.i)
            .ok_or_else(|| anyhow::anyhow!("unexpected EOF at {}", self.i))?;
        self.i += 1;
        Ok(v)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        let s = self
            .b
            .get(self.i..self.i + n)
            .ok_or_else(|| anyhow::anyhow!("unexpected EOF at {}", self.i))?;
        self.i += n;
        Ok(s)
    }

    pub fn read_var_number(&mut self) -> Result<u64> {
        let first = self.read_u8()?;
        match first {
            253 => Ok(u64::from(u16::from_be_bytes(
                self.read_exact(2)?.try_into().unwrap(),
            ))),
            254 => Ok(u64::from(u32::from_be_bytes(
                self.read_exact(4)?.try_into().unwrap(),
            ))),
            255 => Ok(u64::from_be_bytes(self.read_exact(8)?.try_into().unwrap())),
            v => Ok(u64::from(v)),
        }
    }

    /// Read the next element and return its type and value bytes.
    pub fn read_element(&mut self) -> Result<(u64, &'a [u8])> {
        let typ = self.read_var_number()?;
        let len = self.read_var_number()?;
        let len = usize::try_from(len).map_err(|_| anyhow::anyhow!("TLV length overflow"))?;
        let value = self.read_exact(len)?;
        Ok((typ, value))
    }

    /// Read the next element, requiring it to have the given type.
    pub fn read_expected(&mut self, typ: u64) -> Result<&'a [u8]> {
        let (got, value) = self.read_element()?;
        if got != typ {
            bail!("expected TLV type {typ}, got {got}");
        }
        Ok(value)
    }

    /// Peek the type of the next element without consuming it.
    pub fn peek_type(&self) -> Option<u64> {
        let mut probe = Reader {
            b: self.b,
            i: self.i,
        };
        if probe.at_end() {
            return None;
        }
        probe.read_var_number().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_number_round_trips_all_widths() {
        for v in [0u64, 1, 252, 253, 65535, 65536, u64::from(u32::MAX), u64::MAX] {
            let mut out = Vec::new();
            write_var_number(&mut out, v);
            let mut r = Reader::new(&out);
            assert_eq!(r.read_var_number().unwrap(), v);
            assert!(r.at_end());
        }
    }

    #[test]
    fn element_round_trips() {
        let mut out = Vec::new();
        write_tlv(&mut out, 21, b"hello");
        let mut r = Reader::new(&out);
        let (typ, value) = r.read_element().unwrap();
        assert_eq!(typ, 21);
        assert_eq!(value, b"hello");
    }

    #[test]
    fn truncated_element_is_an_error() {
        let mut out = Vec::new();
        write_tlv(&mut out, 21, b"hello");
        out.truncate(out.len() - 2);
        let mut r = Reader::new(&out);
        assert!(r.read_element().is_err());
    }

    #[test]
    fn nonneg_integer_uses_shortest_form() {
        for (v, len) in [(7u64, 1usize), (300, 2), (70_000, 4), (1 << 40, 8)] {
            let mut out = Vec::new();
            write_nonneg_integer(&mut out, 12, v);
            let mut r = Reader::new(&out);
            let value = r.read_expected(12).unwrap();
            assert_eq!(value.len(), len);
            assert_eq!(decode_nonneg_integer(value).unwrap(), v);
        }
    }

    #[test]
    fn nonneg_integer_rejects_odd_lengths() {
        assert!(decode_nonneg_integer(&[1, 2, 3]).is_err());
    }
}
