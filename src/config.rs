/// Represents config for [`SdCard`](crate::SdCard).
///
/// Every bound is an iteration count, so worst-case latency depends only on the
/// bus clock and the delay implementation.
pub trait SdCardConfig {
    /// Idle bytes clocked with the card deselected before GO_IDLE_STATE.
    const IDLE_CLOCK_BYTES: usize;
    /// Bytes polled for an R1 after a command frame.
    const RESPONSE_POLL_ATTEMPTS: usize;
    /// Max rounds of APP_CMD + SD_SEND_OP_COMD while the card stays idle.
    const INIT_ATTEMPTS: usize;
    /// Delay between two SD_SEND_OP_COMD rounds.
    const INIT_RETRY_DELAY_MS: u8;
    /// Bytes polled for the start block token of a read.
    const READ_TOKEN_ATTEMPTS: usize;
    /// Bytes polled for the end of the busy signal after a write.
    const WRITE_BUSY_ATTEMPTS: usize;
    /// Reported capacity in 512-byte sectors, the CSD register is not parsed.
    const SECTOR_COUNT: u32;
}

/// Default implementation of [`SdCardConfig`](crate::SdCardConfig).
pub struct DefaultSdCardConfig;

impl SdCardConfig for DefaultSdCardConfig {
    const IDLE_CLOCK_BYTES: usize = 10;
    const RESPONSE_POLL_ATTEMPTS: usize = 10;
    const INIT_ATTEMPTS: usize = 1000;
    const INIT_RETRY_DELAY_MS: u8 = 1;
    const READ_TOKEN_ATTEMPTS: usize = 1000;
    const WRITE_BUSY_ATTEMPTS: usize = 1000;
    // 1 GiB
    const SECTOR_COUNT: u32 = 2_097_152;
}
