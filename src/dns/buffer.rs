//! buffers for reading and writing the DNS wire format

use derive_more::Display;

/// Labels are limited to 63 bytes, since the two highest bits of the length
/// byte are reserved for compression pointers.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of an encoded name, including length bytes and the root.
pub const MAX_NAME_LEN: usize = 255;

/// Upper bound on compression pointers followed while reading a single name.
const MAX_JUMPS: usize = 5;

#[derive(Debug, Display)]
pub enum BufferError {
    #[display(fmt = "end of buffer")]
    EndOfBuffer,
    #[display(fmt = "label `{}` exceeds 63 bytes", _0)]
    LabelTooLong(String),
    #[display(fmt = "name contains an empty label")]
    EmptyLabel,
    #[display(fmt = "name exceeds 255 bytes")]
    NameTooLong,
    #[display(fmt = "too many compression jumps")]
    TooManyJumps,
    #[display(fmt = "cannot encode records of type {}", _0)]
    UnsupportedRecord(u16),
}

impl std::error::Error for BufferError {}

type Result<T> = std::result::Result<T, BufferError>;

pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&self, pos: usize) -> Result<u8>;
    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn step(&mut self, steps: usize) -> Result<()>;

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write(((val >> 24) & 0xFF) as u8)?;
        self.write(((val >> 16) & 0xFF) as u8)?;
        self.write(((val >> 8) & 0xFF) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    /// Writes `qname` as a sequence of length prefixed labels terminated by
    /// the zero length root label. Leading and trailing dots are ignored.
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        let qname = qname.trim_matches('.');
        if qname.is_empty() {
            return Err(BufferError::EmptyLabel);
        }

        let mut encoded_len = 1;
        for label in qname.split('.') {
            let len = label.len();
            if len == 0 {
                return Err(BufferError::EmptyLabel);
            }
            if len > MAX_LABEL_LEN {
                return Err(BufferError::LabelTooLong(label.to_string()));
            }

            encoded_len += len + 1;
            if encoded_len > MAX_NAME_LEN {
                return Err(BufferError::NameTooLong);
            }

            self.write_u8(len as u8)?;
            for b in label.as_bytes() {
                self.write_u8(*b)?;
            }
        }

        self.write_u8(0)?;

        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16> {
        let res = ((self.read()? as u16) << 8) | (self.read()? as u16);

        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let res = ((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32);

        Ok(res)
    }

    /// Reads a name into `outstr`, following compression pointers.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps_performed = 0;

        let mut delim = "";
        loop {
            let len = self.get(pos)?;

            // A two byte sequence, where the two highest bits of the first byte is
            // set, represents a offset relative to the start of the buffer. We
            // handle this by jumping to the offset, setting a flag to indicate
            // that we shouldn't update the shared buffer position once done.
            if (len & 0xC0) == 0xC0 {
                if jumps_performed >= MAX_JUMPS {
                    return Err(BufferError::TooManyJumps);
                }

                // When a jump is performed, we only modify the shared buffer
                // position once, and avoid making the change later on.
                if !jumped {
                    self.seek(pos + 2)?;
                }

                let b2 = self.get(pos + 1)? as u16;
                let offset = (((len as u16) ^ 0xC0) << 8) | b2;
                pos = offset as usize;
                jumped = true;
                jumps_performed += 1;
                continue;
            }

            pos += 1;

            // Names are terminated by an empty label of length 0
            if len == 0 {
                break;
            }

            outstr.push_str(delim);
            outstr.push_str(&String::from_utf8_lossy(self.get_range(pos, len as usize)?));
            delim = ".";

            pos += len as usize;
        }

        if !jumped {
            self.seek(pos)?;
        }

        Ok(())
    }
}

/// Growable buffer used for building outgoing packets.
#[derive(Default)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::new(),
            pos: 0,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn read(&mut self) -> Result<u8> {
        let res = self.get(self.pos)?;
        self.pos += 1;

        Ok(res)
    }

    fn get(&self, pos: usize) -> Result<u8> {
        self.buffer.get(pos).copied().ok_or(BufferError::EndOfBuffer)
    }

    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]> {
        self.buffer
            .get(start..start + len)
            .ok_or(BufferError::EndOfBuffer)
    }

    fn write(&mut self, val: u8) -> Result<()> {
        self.buffer.push(val);
        self.pos += 1;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.pos += steps;

        Ok(())
    }
}

/// Read-only view over a received datagram. Every access is checked against
/// the datagram length, so a truncated packet yields `EndOfBuffer` rather
/// than stale bytes.
pub struct SlicePacketBuffer<'a> {
    pub buf: &'a [u8],
    pub pos: usize,
}

impl<'a> SlicePacketBuffer<'a> {
    pub fn new(buf: &'a [u8]) -> SlicePacketBuffer<'a> {
        SlicePacketBuffer { buf, pos: 0 }
    }
}

impl<'a> PacketBuffer for SlicePacketBuffer<'a> {
    fn read(&mut self) -> Result<u8> {
        let res = self.get(self.pos)?;
        self.pos += 1;

        Ok(res)
    }

    fn get(&self, pos: usize) -> Result<u8> {
        self.buf.get(pos).copied().ok_or(BufferError::EndOfBuffer)
    }

    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]> {
        self.buf.get(start..start + len).ok_or(BufferError::EndOfBuffer)
    }

    fn write(&mut self, _: u8) -> Result<()> {
        Err(BufferError::EndOfBuffer)
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.seek(self.pos + steps)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn encode(qname: &str) -> Result<Vec<u8>> {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_qname(qname)?;
        Ok(buffer.into_inner())
    }

    #[test]
    fn test_write_qname() {
        let data = encode("www.example.com").unwrap();
        assert_eq!(b"\x03www\x07example\x03com\x00".to_vec(), data);

        // Surrounding dots are stripped
        assert_eq!(data, encode(".www.example.com.").unwrap());
    }

    #[test]
    fn test_qname_roundtrip() {
        let long_label = "x".repeat(63);
        let names = vec!["example.com", "a.b.c.d.e.f", long_label.as_str()];
        for name in names.iter() {
            let data = encode(name).unwrap();

            let mut buffer = SlicePacketBuffer::new(&data);
            let mut decoded = String::new();
            buffer.read_qname(&mut decoded).unwrap();

            assert_eq!(*name, decoded);
            assert_eq!(data.len(), buffer.pos());
        }
    }

    #[test]
    fn test_label_limits() {
        assert!(encode(&"a".repeat(63)).is_ok());

        match encode(&format!("{}.com", "a".repeat(64))) {
            Err(BufferError::LabelTooLong(label)) => assert_eq!(64, label.len()),
            other => panic!("unexpected result: {:?}", other),
        }

        match encode("www..com") {
            Err(BufferError::EmptyLabel) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        match encode(".") {
            Err(BufferError::EmptyLabel) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        let long_name = vec!["a".repeat(63); 4].join(".");
        match encode(&long_name) {
            Err(BufferError::NameTooLong) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_read_qname_with_jump() {
        // "example.com" at offset 0, then "www" followed by a pointer to it
        let mut data = b"\x07example\x03com\x00".to_vec();
        data.extend_from_slice(b"\x03www\xC0\x00");

        let mut buffer = SlicePacketBuffer::new(&data);
        buffer.seek(13).unwrap();

        let mut name = String::new();
        buffer.read_qname(&mut name).unwrap();

        assert_eq!("www.example.com", name);
        assert_eq!(data.len(), buffer.pos());
    }

    #[test]
    fn test_read_qname_rejects_loops() {
        let data = b"\xC0\x00".to_vec();

        let mut buffer = SlicePacketBuffer::new(&data);
        let mut name = String::new();
        match buffer.read_qname(&mut name) {
            Err(BufferError::TooManyJumps) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_reads() {
        let data = b"\x07exam".to_vec();

        let mut buffer = SlicePacketBuffer::new(&data);
        let mut name = String::new();
        assert!(buffer.read_qname(&mut name).is_err());

        let mut buffer = SlicePacketBuffer::new(&data[..1]);
        assert!(buffer.read_u16().is_err());
        assert!(buffer.step(5).is_err());
    }
}
