use crate::HlsError;
use crate::Result;

/// A most-significant-bit-first reader over a byte slice
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
    bit_position: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a reader positioned at the first bit of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            bit_position: 0,
        }
    }

    /// Reads up to 32 bits and returns them right-aligned
    pub fn read_bits(&mut self, count: u8) -> Result<u32> {
        if count > 32 {
            return Err(HlsError::InvalidData(
                "Cannot read more than 32 bits".into(),
            ));
        }

        let mut result = 0u32;
        let mut bits_left = count;

        while bits_left > 0 {
            if self.position >= self.data.len() {
                return Err(HlsError::InvalidData("Reached end of data".into()));
            }

            let byte = self.data[self.position];
            let bits_in_byte = 8 - self.bit_position;
            let bits_to_read = bits_in_byte.min(bits_left);

            let mask = ((1u16 << bits_to_read) - 1) as u8;
            let shifted = (byte >> (8 - self.bit_position - bits_to_read)) & mask;

            result = (result << bits_to_read) | shifted as u32;

            self.bit_position += bits_to_read;
            if self.bit_position >= 8 {
                self.position += 1;
                self.bit_position = 0;
            }

            bits_left -= bits_to_read;
        }

        Ok(result)
    }

    /// Skips `count` bits without interpreting them
    pub fn skip_bits(&mut self, count: u32) -> Result<()> {
        let new_pos = self.position * 8 + self.bit_position as usize + count as usize;
        self.position = new_pos / 8;
        self.bit_position = (new_pos % 8) as u8;

        if self.position > self.data.len() {
            return Err(HlsError::InvalidData(
                "Attempted to skip past end of data".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bits() {
        let data = [0b1011_0011, 0b1100_0001];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(5).unwrap(), 0b10011);
        assert_eq!(reader.read_bits(8).unwrap(), 0b1100_0001);
        assert!(reader.read_bits(1).is_err());
    }

    #[test]
    fn test_skip_bits() {
        let data = [0xFF, 0x0F];
        let mut reader = BitReader::new(&data);
        reader.skip_bits(12).unwrap();
        assert_eq!(reader.read_bits(4).unwrap(), 0x0F);
    }
}
