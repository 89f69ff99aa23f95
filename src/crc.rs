// Tello packets carry a CRC-8 over the 3 header bytes and a CRC-16 over everything
// before the trailer. Both are reflected table driven CRCs with non-zero seeds.

const CRC8_POLY: u8 = 0x8c;
const CRC8_SEED: u8 = 0x77;
const CRC16_POLY: u16 = 0x8408;
const CRC16_SEED: u16 = 0x3692;

const CRC8_TABLE: [u8; 256] = crc8_table();
const CRC16_TABLE: [u16; 256] = crc16_table();

const fn crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u8;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 1 == 1 { (c >> 1) ^ CRC8_POLY } else { c >> 1 };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

const fn crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u16;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 1 == 1 { (c >> 1) ^ CRC16_POLY } else { c >> 1 };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

pub(crate) fn calculate_crc8(buff: &[u8]) -> u8 {
    buff.iter()
        .fold(CRC8_SEED, |crc, b| CRC8_TABLE[(crc ^ b) as usize])
}

pub(crate) fn calculate_crc16(buff: &[u8]) -> u16 {
    buff.iter().fold(CRC16_SEED, |crc, b| {
        CRC16_TABLE[((crc ^ *b as u16) & 0xff) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_header() {
        assert_eq!(124, calculate_crc8(&[204, 88, 0]));
        assert_eq!(39, calculate_crc8(&[204, 96, 0]));
    }

    #[test]
    fn test_crc16_takeoff() {
        let crc = calculate_crc16(&[204, 88, 0, 124, 104, 84, 0, 123, 0]);
        assert_eq!(222, crc as u8);
        assert_eq!(157, (crc >> 8) as u8);
    }
}
