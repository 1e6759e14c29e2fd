use sd_diag::sequencer::FailurePolicy;

pub(crate) const UART_BAUD: u32 = 115_200;

/// Conservative bus speed for the init handshake; any card must cope.
pub(crate) const SD_SPI_KHZ: u32 = 400;

/// FAT short-name form of the test artifact.
pub(crate) const FILE_NAME: &str = "TEST.TXT";
pub(crate) const PATTERN_PAYLOAD_LEN: u32 = 2048;

/// What a failed pass does: re-prompt from the top, or park the CPU.
pub(crate) const FAIL_POLICY: FailurePolicy = FailurePolicy::AbortToCaller;
