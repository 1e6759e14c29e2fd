mod config;

use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::{
    delay::Delay,
    gpio::{Level, Output, OutputConfig},
    spi::{
        master::{Config as SpiConfig, Spi},
        Mode as SpiMode,
    },
    time::Rate,
    uart::{Config as UartConfig, Uart},
};
use sd_diag::{
    console::Console,
    sd_bridge::SdBridge,
    sequencer::{run_pass, FailurePolicy},
};

use self::config::{FAIL_POLICY, FILE_NAME, PATTERN_PAYLOAD_LEN, SD_SPI_KHZ, UART_BAUD};

pub(crate) fn run() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default());
    esp_println::logger::init_logger_from_env();

    let uart_cfg = UartConfig::default().with_baudrate(UART_BAUD);
    let uart = Uart::new(peripherals.UART0, uart_cfg)
        .expect("failed to init UART0")
        .with_rx(peripherals.GPIO3)
        .with_tx(peripherals.GPIO1);

    let sd_spi_cfg = SpiConfig::default()
        .with_frequency(Rate::from_khz(SD_SPI_KHZ))
        .with_mode(SpiMode::_0);
    let sd_spi = Spi::new(peripherals.SPI2, sd_spi_cfg)
        .expect("failed to init SPI2 for the SD bus")
        .with_sck(peripherals.GPIO14)
        .with_mosi(peripherals.GPIO13)
        .with_miso(peripherals.GPIO12);
    let sd_cs = Output::new(peripherals.GPIO15, Level::High, OutputConfig::default());
    let sd_dev = ExclusiveDevice::new(sd_spi, sd_cs, Delay::new())
        .expect("failed to claim the SD SPI bus");

    let mut console = Console::new(uart);
    let mut storage = SdBridge::new(sd_dev, Delay::new());

    console.prompt("Press enter to start test");
    loop {
        match run_pass(&mut console, &mut storage, FILE_NAME, PATTERN_PAYLOAD_LEN) {
            Ok(()) => {}
            Err(step) => {
                log::warn!("diagnostic pass ended at {step:?}");
                match FAIL_POLICY {
                    FailurePolicy::AbortToCaller => {}
                    FailurePolicy::HaltForever => halt_forever(),
                }
            }
        }
    }
}

fn halt_forever() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
