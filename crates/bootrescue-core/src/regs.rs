//! CH32V003 register map
//!
//! Only the registers the rescue firmware touches are listed. Addresses and
//! bit positions follow the CH32V003 reference manual.

use bitflags::bitflags;

/// Base address of the flash controller
pub const FLASH_BASE: u32 = 0x4002_2000;
/// Base address of the alternate function I/O block
pub const AFIO_BASE: u32 = 0x4001_0000;
/// Base address of GPIO port D
pub const GPIOD_BASE: u32 = 0x4001_1400;
/// Base address of the reset and clock controller
pub const RCC_BASE: u32 = 0x4002_1000;
/// Base address of the programmable fast interrupt controller
pub const PFIC_BASE: u32 = 0xE000_E000;

/// First flash unlock key
pub const KEY1: u32 = 0x4567_0123;
/// Second flash unlock key
pub const KEY2: u32 = 0xCDEF_89AB;

/// Value of an erased flash word
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Memory-mapped registers addressable through [`crate::hal::RegisterBus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reg {
    /// FLASH_KEYR - main controller unlock
    FlashKeyr,
    /// FLASH_OBKEYR - option byte unlock
    FlashObkeyr,
    /// FLASH_STATR - status (busy, errors, boot mode)
    FlashStatr,
    /// FLASH_CTLR - control (operation select, start, locks)
    FlashCtlr,
    /// FLASH_ADDR - target address for erase/program
    FlashAddr,
    /// FLASH_MODEKEYR - fast page program/erase unlock
    FlashModekeyr,
    /// FLASH_BOOT_MODEKEYR - boot area and boot mode flag unlock
    FlashBootModekeyr,
    /// AFIO_PCFR1 - remap register holding the SWJ configuration
    AfioPcfr1,
    /// GPIOD_CFGLR - port D pin configuration (pins 0-7)
    GpiodCfglr,
    /// RCC_RSTSCKR - reset status and clock control
    RccRstsckr,
    /// PFIC_CFGR - interrupt controller configuration (system reset)
    PficCfgr,
    /// DMDATA0 - first debug module data register (mailbox)
    DmData0,
    /// DMDATA1 - second debug module data register (mailbox)
    DmData1,
}

impl Reg {
    /// Every register in the map
    pub const ALL: [Reg; 13] = [
        Self::FlashKeyr,
        Self::FlashObkeyr,
        Self::FlashStatr,
        Self::FlashCtlr,
        Self::FlashAddr,
        Self::FlashModekeyr,
        Self::FlashBootModekeyr,
        Self::AfioPcfr1,
        Self::GpiodCfglr,
        Self::RccRstsckr,
        Self::PficCfgr,
        Self::DmData0,
        Self::DmData1,
    ];

    /// Look up the register at an absolute address
    pub fn from_addr(addr: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|reg| reg.addr() == addr)
    }

    /// Absolute address of the register
    pub const fn addr(self) -> u32 {
        match self {
            Self::FlashKeyr => FLASH_BASE + 0x04,
            Self::FlashObkeyr => FLASH_BASE + 0x08,
            Self::FlashStatr => FLASH_BASE + 0x0C,
            Self::FlashCtlr => FLASH_BASE + 0x10,
            Self::FlashAddr => FLASH_BASE + 0x14,
            Self::FlashModekeyr => FLASH_BASE + 0x24,
            Self::FlashBootModekeyr => FLASH_BASE + 0x28,
            Self::AfioPcfr1 => AFIO_BASE + 0x04,
            Self::GpiodCfglr => GPIOD_BASE,
            Self::RccRstsckr => RCC_BASE + 0x24,
            Self::PficCfgr => PFIC_BASE + 0x48,
            Self::DmData0 => 0xE000_00F4,
            Self::DmData1 => 0xE000_00F8,
        }
    }
}

bitflags! {
    /// FLASH_CTLR bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Ctlr: u32 {
        /// Standard programming
        const PG       = 1 << 0;
        /// Sector erase
        const PER      = 1 << 1;
        /// Mass erase
        const MER      = 1 << 2;
        /// Start the selected operation
        const STRT     = 1 << 6;
        /// Controller lock
        const LOCK     = 1 << 7;
        /// Option byte write enable
        const OBWRE    = 1 << 9;
        /// Fast programming lock
        const FLOCK    = 1 << 15;
        /// Fast page (64 byte) programming
        const PAGE_PG  = 1 << 16;
        /// Fast page (64 byte) erase
        const PAGE_ER  = 1 << 17;
        /// Load the latched word into the page buffer
        const BUF_LOAD = 1 << 18;
        /// Reset the page buffer
        const BUF_RST  = 1 << 19;

        /// Bits that must be clear before erase/program is allowed
        const LOCKED = Self::LOCK.bits() | Self::FLOCK.bits();
    }
}

bitflags! {
    /// FLASH_STATR bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Statr: u32 {
        /// Operation in progress
        const BSY       = 1 << 0;
        /// Write protection error
        const WRPRTERR  = 1 << 4;
        /// End of operation
        const EOP       = 1 << 5;
        /// Boot from the system (factory) bootloader on next reset
        const MODE      = 1 << 14;
        /// Boot area and MODE flag are write locked
        const BOOT_LOCK = 1 << 15;
    }
}

/// SWJ_CFG field of AFIO_PCFR1
pub const AFIO_PCFR1_SWJ_CFG: u32 = 0x0700_0000;

/// GPIO mode: output, 50 MHz
pub const GPIO_SPEED_50MHZ: u32 = 0x3;
/// GPIO configuration: push-pull output
pub const GPIO_CNF_OUT_PP: u32 = 0x0;
/// Pin on port D that carries SWIO
pub const SWIO_PIN: u32 = 1;

/// RMVF bit of RCC_RSTSCKR (clear reset flags)
pub const RCC_RSTSCKR_RMVF: u32 = 0x0100_0000;

/// PFIC_CFGR value: KEYCODE 0xBEEF with RESETSYS set
pub const PFIC_CFGR_SYSRESET: u32 = 0xBEEF_0080;

/// Debug module registers reachable over the single-wire debug interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DmReg {
    /// Debug module control
    Control = 0x10,
    /// Abstract command auto-execution
    AbstractAuto = 0x18,
    /// Configuration
    Cfgr = 0x7D,
    /// Shadow configuration
    ShadowCfgr = 0x7E,
}
