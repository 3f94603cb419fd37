use crate::error::Result;

/// All commands and registers need to have this trait which gives the 16-bit
/// word that is sent over SPI after the matching preamble
pub(crate) trait Command: Copy {
    fn address(self) -> u16;
}

/// The bus client the protocol engine talks through.
///
/// Every call is blocking. Implementations frame each word with the
/// preamble described in [`command`](crate::command) and must not reorder
/// calls: the controller depends on strict ordering over the shared bus.
pub trait Transport {
    /// Brings up the bus and the control pins. Calling it twice is harmless.
    fn init(&mut self) -> Result<()>;

    /// Releases the bus. Best effort, never retried.
    fn close(&mut self);

    /// Hardware reset of the controller
    fn reset(&mut self) -> Result<()>;

    /// Blocks until the host-ready line reports idle, or `timeout_ms` passes
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<()>;

    /// Sends one command word
    fn write_command(&mut self, command: u16) -> Result<()>;

    /// Sends one data word
    fn write_data(&mut self, data: u16) -> Result<()>;

    /// Sends a run of data words behind a single preamble
    fn write_data_bulk(&mut self, data: &[u16]) -> Result<()>;

    /// Reads one reply word
    fn read_data(&mut self) -> Result<u16>;

    /// Reads `length` reply words behind a single preamble
    fn read_data_bulk(&mut self, length: usize) -> Result<Vec<u16>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn wait_ready(&mut self, timeout_ms: u32) -> Result<()> {
        (**self).wait_ready(timeout_ms)
    }

    fn write_command(&mut self, command: u16) -> Result<()> {
        (**self).write_command(command)
    }

    fn write_data(&mut self, data: u16) -> Result<()> {
        (**self).write_data(data)
    }

    fn write_data_bulk(&mut self, data: &[u16]) -> Result<()> {
        (**self).write_data_bulk(data)
    }

    fn read_data(&mut self) -> Result<u16> {
        (**self).read_data()
    }

    fn read_data_bulk(&mut self, length: usize) -> Result<Vec<u16>> {
        (**self).read_data_bulk(length)
    }
}
