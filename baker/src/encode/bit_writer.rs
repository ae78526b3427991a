/// Appends little endian bit fields to a byte buffer.
pub struct BitWriter<'a> {
    buffer: &'a mut Vec<u8>,
    pending: u64,
    num_pending: u32,
}

impl<'a> BitWriter<'a> {
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self {
            buffer,
            pending: 0,
            num_pending: 0,
        }
    }

    pub fn put_bits(&mut self, bits: u32, num_bits: u32) {
        debug_assert!(num_bits <= 32);
        debug_assert!((bits as u64) < (1u64 << num_bits) || num_bits == 32);
        self.pending |= (bits as u64) << self.num_pending;
        self.num_pending += num_bits;

        while self.num_pending >= 8 {
            self.buffer.push(self.pending as u8);
            self.pending >>= 8;
            self.num_pending -= 8;
        }
    }

    /// Write out any partial byte and pad the buffer to `alignment`.
    pub fn flush(&mut self, alignment: usize) {
        if self.num_pending > 0 {
            self.buffer.push(self.pending as u8);
        }
        while self.buffer.len() % alignment != 0 {
            self.buffer.push(0);
        }
        self.pending = 0;
        self.num_pending = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_packs_lsb_first() {
        let mut bytes = Vec::new();
        let mut w = BitWriter::new(&mut bytes);
        w.put_bits(0b101, 3);
        w.put_bits(0b11111, 5);
        w.put_bits(0x3ff, 10);
        w.flush(4);
        assert_eq!(bytes, vec![0b1111_1101, 0xff, 0b11, 0]);
    }

    #[test]
    fn test_full_words() {
        let mut bytes = Vec::new();
        let mut w = BitWriter::new(&mut bytes);
        w.put_bits(0xdead_beef, 32);
        w.flush(1);
        assert_eq!(bytes, 0xdead_beefu32.to_le_bytes());
    }
}
