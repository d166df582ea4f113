//! Append-only assembler for instruction streams.
//!
//! Used by the package loader when materializing function bodies and by
//! tests that need hand-assembled bytecode.

use crate::opcode::Opcode;

/// Builder for a function's instruction bytes.
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    bytes: Vec<u8>,
}

impl BytecodeWriter {
    /// Create an empty writer.
    #[inline]
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Current length in bytes; the offset the next emission lands at.
    #[inline]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    /// Emit an opcode byte.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.bytes.push(opcode as u8);
        self
    }

    /// Emit a variable-byte signed integer.
    pub fn vbn(&mut self, mut value: i64) -> &mut Self {
        loop {
            let group = (value & 0x7F) as u8;
            value >>= 7;
            // The encoding is complete once the remaining bits agree with
            // the sign bit of the last emitted group.
            let done = (value == 0 && group & 0x40 == 0) || (value == -1 && group & 0x40 != 0);
            if done {
                self.bytes.push(group);
                return self;
            }
            self.bytes.push(group | 0x80);
        }
    }

    /// Emit a 32-bit float immediate (little-endian).
    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emit a 64-bit float immediate (little-endian).
    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Finish and take the assembled bytes.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::BytecodeReader;

    fn round_trip(value: i64) -> i64 {
        let mut writer = BytecodeWriter::new();
        writer.vbn(value);
        let bytes = writer.finish();
        let mut reader = BytecodeReader::new(&bytes);
        let decoded = reader.read_vbn().unwrap();
        assert!(reader.is_at_end());
        decoded
    }

    #[test]
    fn test_vbn_encodings() {
        let mut writer = BytecodeWriter::new();
        writer.vbn(0).vbn(-1).vbn(63).vbn(64);
        assert_eq!(writer.finish(), vec![0x00, 0x7F, 0x3F, 0xC0, 0x00]);
    }

    #[test]
    fn test_vbn_boundary_values() {
        for value in [
            0,
            1,
            -1,
            63,
            64,
            -64,
            -65,
            300,
            -300,
            i64::from(i32::MAX),
            i64::from(i32::MIN),
            i64::MAX,
            i64::MIN,
        ] {
            assert_eq!(round_trip(value), value);
        }
    }

    #[test]
    fn test_assemble_instruction() {
        let mut writer = BytecodeWriter::new();
        writer.op(Opcode::I32).vbn(7);
        writer.op(Opcode::Ret);
        let bytes = writer.finish();
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::I32);
        assert_eq!(reader.read_vbn().unwrap(), 7);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Ret);
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_float_immediates() {
        let mut writer = BytecodeWriter::new();
        writer.op(Opcode::F64).f64(1.5);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 9);
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::F64);
        reader.skip(8).unwrap();
        assert!(reader.is_at_end());
    }
}
