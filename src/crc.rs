/// CRC-7 calculation.
///
/// Only GO_IDLE_STATE and SEND_IF_COND are checked by a card in SPI mode, every
/// other frame carries a placeholder instead.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0;
    for mut byte in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((byte & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            byte <<= 1;
        }
    }
    crc & 0x7F
}
