//! SPI Commands and registers of the IT8951 controller
//!
//! Every transaction on the bus opens with a 16-bit preamble telling the
//! controller how to interpret the words that follow.

use crate::traits;

extern crate bit_field;
use bit_field::BitField;

/// Preamble for a data write
pub const PREAMBLE_WRITE: u16 = 0x0000;
/// Preamble for a data read. One dummy word is clocked before the reply.
pub const PREAMBLE_READ: u16 = 0x1000;
/// Preamble for a command word
pub const PREAMBLE_COMMAND: u16 = 0x6000;
/// Dummy word clocked out before every read reply
pub const DUMMY_WORD: u16 = 0x0000;

/// IT8951 commands
///
/// For more infos about the addresses and what they are doing look into the
/// IT8951 programming guide.
#[allow(dead_code)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    /// Puts the controller into the running state, also used to wake it up
    SysRun = 0x0001,
    Standby = 0x0002,
    Sleep = 0x0003,
    /// Register read, followed by the register address
    RegRead = 0x0010,
    /// Register write, followed by the register address and the value
    RegWrite = 0x0011,
    /// Burst write into the memory pointed at by LISAR
    MemBurstWrite = 0x0014,
    LoadImage = 0x0020,
    LoadImageArea = 0x0021,
    LoadImageEnd = 0x0022,
    DisplayArea = 0x0034,
    DisplayBufferArea = 0x0037,
    /// Read or write the VCOM voltage
    Vcom = 0x0039,
    GetDeviceInfo = 0x0302,
}

impl traits::Command for Command {
    /// Returns the address of the command
    fn address(self) -> u16 {
        self as u16
    }
}

/// IT8951 registers the driver touches
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    /// Load image start address, low half. The high half lives at +2.
    Lisar,
    /// I80 control register; bit 0 enables packed writes
    Reg0204,
    /// Enhanced driving capability
    EnhanceDriving,
    /// Miscellaneous status; bit 7 is the LUT busy flag
    Misc,
    /// Power control
    Pwr,
    /// Memory controller status
    Mcsr,
}

impl Register {
    /// All registers, in dump order
    pub const ALL: [Register; 6] = [
        Register::Lisar,
        Register::Reg0204,
        Register::Misc,
        Register::Pwr,
        Register::Mcsr,
        Register::EnhanceDriving,
    ];

    /// Name used in register dumps
    pub fn name(self) -> &'static str {
        match self {
            Register::Lisar => "LISAR",
            Register::Reg0204 => "REG_0204",
            Register::EnhanceDriving => "ENHANCE_DRIVING",
            Register::Misc => "MISC",
            Register::Pwr => "PWR",
            Register::Mcsr => "MCSR",
        }
    }

    /// Full register address as listed in the datasheet
    pub fn full_address(self) -> u32 {
        match self {
            Register::Lisar => 0x0200,
            Register::Reg0204 => 0x0204,
            Register::EnhanceDriving => 0x0038,
            Register::Misc => 0x1E50,
            Register::Pwr => 0x1E54,
            Register::Mcsr => 0x0001_8004,
        }
    }

    /// The 16-bit word sent after `REG_RD`/`REG_WR`.
    ///
    /// MCSR sits above the 16-bit range and is addressed through its low half.
    pub fn address(self) -> u16 {
        (self.full_address() & 0xFFFF) as u16
    }
}

impl traits::Command for Register {
    fn address(self) -> u16 {
        Register::address(self)
    }
}

/// Offset of the LISAR high half from its low half
pub const LISAR_HIGH_OFFSET: u16 = 2;

/// Value for [`Register::EnhanceDriving`] that fixes blurry output on long cables
pub const ENHANCED_DRIVING_VALUE: u16 = 0x0602;

/// Number of words in the device info block
pub const DEVICE_INFO_WORDS: usize = 20;

/// Scale between volts and the raw VCOM word
pub const VCOM_FACTOR: f64 = 1000.0;

/// Splits a 32-bit controller address into its (low, high) 16-bit halves
pub fn split_address(address: u32) -> (u16, u16) {
    ((address & 0xFFFF) as u16, (address >> 16) as u16)
}

/// Inverse of [`split_address`]
pub fn combine_address(low: u16, high: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Content of [`Register::Reg0204`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct I80Control(pub u16);

impl I80Control {
    pub fn enable_packed_write(mut self) -> Self {
        self.0.set_bit(0, true);
        self
    }

    pub fn packed_write(self) -> bool {
        self.0.get_bit(0)
    }
}

/// Content of [`Register::Misc`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct MiscStatus(pub u16);

impl MiscStatus {
    pub fn lut_busy(self) -> bool {
        self.0.get_bit(7)
    }
}

/// Mode word of the VCOM command
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum VcomAccess {
    Read = 0,
    Write = 1,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Command as CommandTrait;
    use proptest::prelude::*;

    #[test]
    fn command_addr() {
        assert_eq!(Command::SysRun.address(), 0x0001);
        assert_eq!(Command::MemBurstWrite.address(), 0x0014);
        assert_eq!(Command::LoadImageArea.address(), 0x0021);
        assert_eq!(Command::DisplayBufferArea.address(), 0x0037);
        assert_eq!(Command::GetDeviceInfo.address(), 0x0302);
    }

    #[test]
    fn register_addr() {
        assert_eq!(Register::Lisar.address(), 0x0200);
        assert_eq!(Register::Misc.address(), 0x1E50);
        assert_eq!(Register::Pwr.address(), 0x1E54);
        assert_eq!(Register::Mcsr.address(), 0x8004);
    }

    #[test]
    fn split_known_addresses() {
        assert_eq!(split_address(0x1234_5678), (0x5678, 0x1234));
        assert_eq!(split_address(0x0012_36E0), (0x36E0, 0x0012));
        assert_eq!(split_address(0x1000), (0x1000, 0x0000));
    }

    #[test]
    fn status_bits() {
        assert!(MiscStatus(0x0080).lut_busy());
        assert!(!MiscStatus(0xFF7F).lut_busy());
        let reg = I80Control(0x0010).enable_packed_write();
        assert_eq!(reg.0, 0x0011);
        assert!(reg.packed_write());
    }

    proptest! {
        #[test]
        fn address_round_trip(address in any::<u32>()) {
            let (low, high) = split_address(address);
            prop_assert_eq!(combine_address(low, high), address);
        }
    }
}
