//! Emulated CH32V003 state
//!
//! Models the parts of the chip the rescue firmware touches:
//! - 16 KiB user flash and the 1920 byte boot area, erased to 0xFF
//! - Key sequences for KEYR, OBKEYR, MODEKEYR and BOOT_MODEKEYR
//! - Fast 64 byte page erase and page buffer programming (bits only go
//!   from 1 to 0)
//! - Write protection of the boot area until BOOT_MODEKEYR is unlocked
//! - DMDATA0/DMDATA1, AFIO, GPIOD, RCC and PFIC registers
//! - Debug wire writes, recorded as they arrive

use bootrescue_core::debug::{DM_CONTROL_RESUME, DM_OUTPUT_ENABLE};
use bootrescue_core::regs::{
    Ctlr, DmReg, Reg, Statr, ERASED_WORD, KEY1, KEY2, PFIC_CFGR_SYSRESET, RCC_RSTSCKR_RMVF,
};

use crate::error::{Result, SimError};

/// Start of user flash
pub const USER_FLASH_BASE: u32 = 0x0800_0000;
/// Size of user flash
pub const USER_FLASH_SIZE: usize = 16 * 1024;
/// Start of the boot area
pub const BOOT_FLASH_BASE: u32 = 0x1FFF_F000;
/// Size of the boot area
pub const BOOT_FLASH_SIZE: usize = 1920;

const PAGE: u32 = 64;

/// A flash operation the controller carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// Page erase
    Erase {
        /// Page address
        page: u32,
    },
    /// Page buffer committed to flash
    Program {
        /// Block address
        block: u32,
    },
    /// Operation refused by write protection
    Refused {
        /// Address in FLASH_ADDR at the time
        addr: u32,
    },
}

/// Where the chip boots after a requested reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    /// User flash
    User,
    /// Factory bootloader in the boot area
    Bootloader,
}

#[derive(Debug, Default, Clone, Copy)]
struct KeyLatch {
    first_seen: bool,
}

impl KeyLatch {
    /// Feed a key write; true once KEY1 followed by KEY2 arrives
    fn feed(&mut self, value: u32) -> bool {
        match (value, self.first_seen) {
            (KEY1, _) => {
                self.first_seen = true;
                false
            }
            (KEY2, true) => {
                self.first_seen = false;
                true
            }
            _ => {
                self.first_seen = false;
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Area {
    User,
    Boot,
}

/// The emulated chip
#[derive(Debug, Clone)]
pub struct Device {
    user: Vec<u8>,
    boot: Vec<u8>,

    keyr: KeyLatch,
    obkeyr: KeyLatch,
    modekeyr: KeyLatch,
    boot_modekeyr: KeyLatch,
    locked: bool,
    fast_locked: bool,
    boot_locked: bool,
    option_bytes_unlocked: bool,

    ctlr: u32,
    addr: u32,
    statr: u32,
    boot_mode: bool,
    latched: Option<(u32, u32)>,
    page_buffer: [u32; 16],

    afio_pcfr1: u32,
    gpiod_cfglr: u32,
    rcc_rstsckr: u32,
    dmdata0: u32,
    dmdata1: u32,

    interrupts_enabled: bool,
    elapsed_ms: u64,
    reset: Option<ResetTarget>,
    ops: Vec<FlashOp>,
    debug_writes: Vec<(DmReg, u32, u8)>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    /// A chip with erased flash and every lock engaged, as after reset
    pub fn new() -> Self {
        Self {
            user: vec![0xFF; USER_FLASH_SIZE],
            boot: vec![0xFF; BOOT_FLASH_SIZE],
            keyr: KeyLatch::default(),
            obkeyr: KeyLatch::default(),
            modekeyr: KeyLatch::default(),
            boot_modekeyr: KeyLatch::default(),
            locked: true,
            fast_locked: true,
            boot_locked: true,
            option_bytes_unlocked: false,
            ctlr: 0,
            addr: 0,
            statr: 0,
            boot_mode: false,
            latched: None,
            page_buffer: [ERASED_WORD; 16],
            // SWD disabled by the running firmware, PD1 floating input
            afio_pcfr1: 0x0400_0000,
            gpiod_cfglr: 0x4444_4444,
            rcc_rstsckr: 0x0C00_0000,
            dmdata0: 0,
            dmdata1: 0,
            interrupts_enabled: true,
            elapsed_ms: 0,
            reset: None,
            ops: Vec::new(),
            debug_writes: Vec::new(),
        }
    }

    fn locate(addr: u32) -> Option<(Area, usize)> {
        let in_range = |base: u32, size: usize| {
            addr.checked_sub(base)
                .map(|off| off as usize)
                .filter(|&off| off < size)
        };
        in_range(USER_FLASH_BASE, USER_FLASH_SIZE)
            .map(|off| (Area::User, off))
            .or_else(|| in_range(BOOT_FLASH_BASE, BOOT_FLASH_SIZE).map(|off| (Area::Boot, off)))
    }

    fn area(&self, area: Area) -> &[u8] {
        match area {
            Area::User => &self.user,
            Area::Boot => &self.boot,
        }
    }

    fn area_mut(&mut self, area: Area) -> &mut [u8] {
        match area {
            Area::User => &mut self.user,
            Area::Boot => &mut self.boot,
        }
    }

    fn check_range(addr: u32, len: usize) -> Result<(Area, usize)> {
        let (area, off) = Self::locate(addr).ok_or(SimError::Unmapped { addr })?;
        let size = match area {
            Area::User => USER_FLASH_SIZE,
            Area::Boot => BOOT_FLASH_SIZE,
        };
        if off + len > size {
            return Err(SimError::OutOfRange { addr, len });
        }
        Ok((area, off))
    }

    /// Copy flash contents out
    pub fn read_region(&self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let (area, off) = Self::check_range(addr, len)?;
        Ok(self.area(area)[off..off + len].to_vec())
    }

    /// Overwrite flash directly, bypassing the controller
    pub fn load(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let (area, off) = Self::check_range(addr, bytes.len())?;
        self.area_mut(area)[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Fill flash directly, bypassing the controller
    pub fn fill(&mut self, addr: u32, len: usize, value: u8) -> Result<()> {
        let (area, off) = Self::check_range(addr, len)?;
        self.area_mut(area)[off..off + len].fill(value);
        Ok(())
    }

    fn flash_word(&self, addr: u32) -> u32 {
        let mut bytes = [0xFF; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            if let Some((area, off)) = Self::locate(addr + i as u32) {
                *b = self.area(area)[off];
            }
        }
        u32::from_le_bytes(bytes)
    }

    /// Read a word from flash or a mapped register
    pub fn read_word(&mut self, addr: u32) -> u32 {
        if let Some(reg) = Reg::from_addr(addr) {
            return self.read_reg(reg);
        }
        if Self::locate(addr).is_none() {
            log::warn!("Read of unmapped address 0x{:08X}", addr);
            return 0;
        }
        self.flash_word(addr & !3)
    }

    /// Store a word to flash or a mapped register
    ///
    /// Flash stores only have an effect in page programming mode, where
    /// they are latched until BUF_LOAD moves them into the page buffer.
    pub fn write_word(&mut self, addr: u32, value: u32) {
        if let Some(reg) = Reg::from_addr(addr) {
            self.write_reg(reg, value);
            return;
        }
        if Self::locate(addr).is_none() {
            log::warn!("Store to unmapped address 0x{:08X}", addr);
            return;
        }
        if Ctlr::from_bits_retain(self.ctlr).contains(Ctlr::PAGE_PG) {
            self.latched = Some((addr, value));
        } else {
            log::trace!("Ignoring flash store outside programming mode at 0x{:08X}", addr);
        }
    }

    /// Read a register
    pub fn read_reg(&mut self, reg: Reg) -> u32 {
        match reg {
            Reg::FlashCtlr => {
                let mut ctlr = Ctlr::from_bits_retain(self.ctlr);
                ctlr.set(Ctlr::LOCK, self.locked);
                ctlr.set(Ctlr::FLOCK, self.fast_locked);
                ctlr.bits()
            }
            Reg::FlashStatr => {
                let mut statr = Statr::from_bits_retain(self.statr);
                statr.set(Statr::MODE, self.boot_mode);
                statr.set(Statr::BOOT_LOCK, self.boot_locked);
                statr.bits()
            }
            Reg::FlashAddr => self.addr,
            Reg::FlashKeyr
            | Reg::FlashObkeyr
            | Reg::FlashModekeyr
            | Reg::FlashBootModekeyr
            | Reg::PficCfgr => 0,
            Reg::AfioPcfr1 => self.afio_pcfr1,
            Reg::GpiodCfglr => self.gpiod_cfglr,
            Reg::RccRstsckr => self.rcc_rstsckr,
            Reg::DmData0 => self.dmdata0,
            Reg::DmData1 => self.dmdata1,
        }
    }

    /// Write a register
    pub fn write_reg(&mut self, reg: Reg, value: u32) {
        match reg {
            Reg::FlashKeyr => {
                if self.keyr.feed(value) {
                    log::debug!("sim: flash controller unlocked");
                    self.locked = false;
                }
            }
            Reg::FlashObkeyr => {
                if self.obkeyr.feed(value) {
                    self.option_bytes_unlocked = true;
                }
            }
            Reg::FlashModekeyr => {
                if self.modekeyr.feed(value) {
                    log::debug!("sim: fast programming unlocked");
                    self.fast_locked = false;
                }
            }
            Reg::FlashBootModekeyr => {
                if self.boot_modekeyr.feed(value) {
                    log::debug!("sim: boot area unlocked");
                    self.boot_locked = false;
                }
            }
            Reg::FlashStatr => {
                let statr = Statr::from_bits_retain(value);
                // EOP and WRPRTERR are write-one-to-clear
                self.statr &= !(value & (Statr::EOP | Statr::WRPRTERR).bits());
                if !self.boot_locked {
                    self.boot_mode = statr.contains(Statr::MODE);
                }
            }
            Reg::FlashCtlr => self.control(value),
            Reg::FlashAddr => self.addr = value,
            Reg::AfioPcfr1 => self.afio_pcfr1 = value,
            Reg::GpiodCfglr => self.gpiod_cfglr = value,
            Reg::RccRstsckr => {
                if value & RCC_RSTSCKR_RMVF != 0 {
                    // clears the reset flags, RMVF itself reads back as 0
                    self.rcc_rstsckr = value & !(RCC_RSTSCKR_RMVF | 0xFE00_0000);
                } else {
                    self.rcc_rstsckr = value;
                }
            }
            Reg::PficCfgr => {
                if value == PFIC_CFGR_SYSRESET {
                    let target = if self.boot_mode {
                        ResetTarget::Bootloader
                    } else {
                        ResetTarget::User
                    };
                    log::info!("sim: system reset requested, booting {:?}", target);
                    self.reset = Some(target);
                }
            }
            Reg::DmData0 => self.dmdata0 = value,
            Reg::DmData1 => self.dmdata1 = value,
        }
    }

    fn writable(&self, addr: u32) -> bool {
        if self.locked || self.fast_locked {
            return false;
        }
        match Self::locate(addr) {
            Some((Area::User, _)) => true,
            Some((Area::Boot, _)) => !self.boot_locked,
            None => false,
        }
    }

    fn refuse(&mut self) {
        log::warn!("sim: write protection error at 0x{:08X}", self.addr);
        self.statr |= Statr::WRPRTERR.bits();
        self.ops.push(FlashOp::Refused { addr: self.addr });
    }

    fn control(&mut self, value: u32) {
        let ctlr = Ctlr::from_bits_retain(value);
        if ctlr.contains(Ctlr::LOCK) {
            self.locked = true;
            self.fast_locked = true;
            self.boot_locked = true;
            self.ctlr = 0;
            return;
        }
        self.ctlr = (ctlr - Ctlr::STRT).bits();

        if ctlr.contains(Ctlr::PAGE_PG | Ctlr::BUF_RST) {
            self.page_buffer = [ERASED_WORD; 16];
            self.latched = None;
        }
        if ctlr.contains(Ctlr::PAGE_PG | Ctlr::BUF_LOAD) {
            if let Some((addr, word)) = self.latched.take() {
                self.page_buffer[((addr % PAGE) / 4) as usize] = word;
            }
        }

        if ctlr.contains(Ctlr::PAGE_ER | Ctlr::STRT) {
            let page = self.addr & !(PAGE - 1);
            if !self.writable(page) {
                self.refuse();
                return;
            }
            for i in 0..PAGE {
                if let Some((area, off)) = Self::locate(page + i) {
                    self.area_mut(area)[off] = 0xFF;
                }
            }
            self.statr |= Statr::EOP.bits();
            self.ops.push(FlashOp::Erase { page });
        }

        if ctlr.contains(Ctlr::PAGE_PG | Ctlr::STRT) {
            let block = self.addr & !(PAGE - 1);
            if !self.writable(block) {
                self.refuse();
                return;
            }
            let buffer = self.page_buffer;
            for (i, word) in buffer.iter().enumerate() {
                for (j, byte) in word.to_le_bytes().iter().enumerate() {
                    if let Some((area, off)) = Self::locate(block + (i * 4 + j) as u32) {
                        self.area_mut(area)[off] &= *byte;
                    }
                }
            }
            self.statr |= Statr::EOP.bits();
            self.ops.push(FlashOp::Program { block });
        }
    }

    /// Record a debug module register write arriving over the debug wire
    pub fn debug_write(&mut self, reg: DmReg, value: u32, t1coeff: u8) {
        log::debug!(
            "sim: debug wire {:?} <- 0x{:08X} (t1coeff {})",
            reg,
            value,
            t1coeff
        );
        self.debug_writes.push((reg, value, t1coeff));
    }

    /// Debug wire writes seen so far
    pub fn debug_writes(&self) -> &[(DmReg, u32, u8)] {
        &self.debug_writes
    }

    /// Whether the debug port was reopened: SWIO handed back to the debug
    /// block, output enabled and the debug module resumed
    pub fn debug_port_unlocked(&self) -> bool {
        let output = self
            .debug_writes
            .iter()
            .position(|&(reg, value, _)| reg == DmReg::ShadowCfgr && value == DM_OUTPUT_ENABLE);
        let resumed = self
            .debug_writes
            .iter()
            .rposition(|&(reg, value, _)| reg == DmReg::Control && value == DM_CONTROL_RESUME);
        let swio_released = self.afio_pcfr1 & bootrescue_core::regs::AFIO_PCFR1_SWJ_CFG == 0;
        matches!((output, resumed), (Some(a), Some(b)) if a < b) && swio_released
    }

    /// Busy-wait accounting
    pub fn delay(&mut self, ms: u32) {
        self.elapsed_ms += u64::from(ms);
    }

    /// Total time spent in delays
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Mask interrupts
    pub fn disable_interrupts(&mut self) {
        self.interrupts_enabled = false;
    }

    /// Whether interrupts are still enabled
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// Reset requested through PFIC, if any
    pub fn reset_request(&self) -> Option<ResetTarget> {
        self.reset
    }

    /// Flash operations carried out so far
    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    /// Forget recorded flash operations
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Whether erase/program is refused everywhere
    pub fn is_locked(&self) -> bool {
        self.locked || self.fast_locked
    }

    /// Whether the boot area is write protected
    pub fn is_boot_locked(&self) -> bool {
        self.boot_locked
    }

    /// Whether the option byte key sequence was seen
    pub fn option_bytes_unlocked(&self) -> bool {
        self.option_bytes_unlocked
    }

    /// Set both mailbox registers as a debugger would
    pub fn set_mailbox(&mut self, data0: u32, data1: u32) {
        self.dmdata0 = data0;
        self.dmdata1 = data1;
    }

    /// Current mailbox contents
    pub fn mailbox(&self) -> (u32, u32) {
        (self.dmdata0, self.dmdata1)
    }
}
