use core::fmt::Debug;

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::{Operation, SpiDevice},
};
use log::debug;

use crate::command::{DUMMY_WORD, PREAMBLE_COMMAND, PREAMBLE_READ, PREAMBLE_WRITE};
use crate::error::{Error, Result};
use crate::traits::Transport;

/// HRDY is pulled low while the controller is busy
pub const IS_BUSY_LOW: bool = true;

/// Default bound for the host ready wait in front of every transaction
pub const DEFAULT_READY_TIMEOUT_MS: u32 = 5_000;

/// How long RST is held at each level during a reset
pub const RESET_HOLD_MS: u32 = 100;

// Be careful!! Linux has a default limit of 4096 bytes per spi transfer
const MAX_SPI_CHUNK: usize = 4096;

/// The connection to the IT8951 over SPI
///
/// Chip select is handled by the [`SpiDevice`]. One preamble plus its
/// payload always goes out as one SPI transaction, so CS stays low for the
/// whole frame.
pub struct SpiInterface<SPI, BUSY, RST, DELAY> {
    /// SPI
    spi: SPI,
    /// HRDY, low for busy. Wait until the controller is ready!
    busy: BUSY,
    /// Pin for Resetting
    rst: RST,
    delay: DELAY,
    /// Bound of the ready wait issued before each transaction
    ready_timeout_ms: u32,
    /// number of ms the idle loop should sleep on
    poll_interval_ms: u32,
    initialized: bool,
}

impl<SPI, BUSY, RST, DELAY> SpiInterface<SPI, BUSY, RST, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    RST: OutputPin,
    DELAY: DelayNs,
{
    /// Creates a new `SpiInterface` struct
    ///
    /// If no poll interval is given, the busy line is sampled every 1ms.
    pub fn new(
        spi: SPI,
        busy: BUSY,
        rst: RST,
        delay: DELAY,
        poll_interval_ms: Option<u32>,
    ) -> Self {
        SpiInterface {
            spi,
            busy,
            rst,
            delay,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            poll_interval_ms: poll_interval_ms.unwrap_or(1).max(1),
            initialized: false,
        }
    }

    /// Changes the bound of the wait in front of each transaction
    pub fn with_ready_timeout(mut self, timeout_ms: u32) -> Self {
        self.ready_timeout_ms = timeout_ms;
        self
    }

    /// Gives back the owned peripherals
    pub fn release(self) -> (SPI, BUSY, RST, DELAY) {
        (self.spi, self.busy, self.rst, self.delay)
    }

    /// Checks if the controller is still busy
    pub fn is_busy(&mut self) -> Result<bool> {
        let level = if IS_BUSY_LOW {
            self.busy.is_low()
        } else {
            self.busy.is_high()
        };
        level.map_err(|e| pin_error("HRDY", e))
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Communication("SPI interface not initialized".into()))
        }
    }

    // One transaction: preamble followed by the payload words
    fn write_frame(&mut self, preamble: u16, words: &[u16]) -> Result<()> {
        self.ensure_initialized()?;
        self.wait_ready(self.ready_timeout_ms)?;
        let header = preamble.to_be_bytes();
        let payload: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let mut operations: Vec<Operation<'_, u8>> =
            Vec::with_capacity(payload.len() / MAX_SPI_CHUNK + 2);
        operations.push(Operation::Write(&header));
        for chunk in payload.chunks(MAX_SPI_CHUNK) {
            operations.push(Operation::Write(chunk));
        }
        self.spi
            .transaction(&mut operations)
            .map_err(|e| Error::Communication(format!("SPI write failed: {e:?}")))
    }

    fn read_frame(&mut self, length: usize) -> Result<Vec<u16>> {
        self.ensure_initialized()?;
        self.wait_ready(self.ready_timeout_ms)?;
        let mut header = [0u8; 4];
        header[..2].copy_from_slice(&PREAMBLE_READ.to_be_bytes());
        header[2..].copy_from_slice(&DUMMY_WORD.to_be_bytes());
        let mut reply = vec![0u8; length * 2];
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Read(&mut reply)])
            .map_err(|e| Error::Communication(format!("SPI read failed: {e:?}")))?;
        Ok(reply
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}

impl<SPI, BUSY, RST, DELAY> Transport for SpiInterface<SPI, BUSY, RST, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    RST: OutputPin,
    DELAY: DelayNs,
{
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.rst.set_high().map_err(|e| pin_error("RST", e))?;
        self.initialized = true;
        self.reset()?;
        debug!("SPI interface initialized");
        Ok(())
    }

    fn close(&mut self) {
        if self.initialized {
            self.initialized = false;
            debug!("SPI interface closed");
        }
    }

    /// Pulls RST low, then releases it, holding each level for [`RESET_HOLD_MS`]
    fn reset(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.rst.set_low().map_err(|e| pin_error("RST", e))?;
        self.delay.delay_ms(RESET_HOLD_MS);
        self.rst.set_high().map_err(|e| pin_error("RST", e))?;
        self.delay.delay_ms(RESET_HOLD_MS);
        Ok(())
    }

    /// Waits until the controller isn't busy anymore (HRDY high)
    ///
    /// The elapsed time is counted in poll intervals, the delay provider is
    /// the only clock available.
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<()> {
        let mut waited_ms = 0u32;
        while self.is_busy()? {
            if waited_ms >= timeout_ms {
                return Err(Error::Timeout {
                    operation: "device ready",
                    timeout_ms,
                });
            }
            self.delay.delay_ms(self.poll_interval_ms);
            waited_ms = waited_ms.saturating_add(self.poll_interval_ms);
        }
        Ok(())
    }

    fn write_command(&mut self, command: u16) -> Result<()> {
        self.write_frame(PREAMBLE_COMMAND, &[command])
    }

    fn write_data(&mut self, data: u16) -> Result<()> {
        self.write_frame(PREAMBLE_WRITE, &[data])
    }

    fn write_data_bulk(&mut self, data: &[u16]) -> Result<()> {
        self.write_frame(PREAMBLE_WRITE, data)
    }

    fn read_data(&mut self) -> Result<u16> {
        let words = self.read_frame(1)?;
        words
            .first()
            .copied()
            .ok_or_else(|| Error::Communication("empty SPI reply".into()))
    }

    fn read_data_bulk(&mut self, length: usize) -> Result<Vec<u16>> {
        self.read_frame(length)
    }
}

fn pin_error(pin: &str, error: impl Debug) -> Error {
    Error::Communication(format!("{pin} pin error: {error:?}"))
}
