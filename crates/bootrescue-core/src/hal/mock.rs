//! Recording register bus used by the unit tests
//!
//! This mock tracks every access and simulates just enough of the flash
//! controller to exercise the engine:
//! - Memory starts as all 0xFF (erased state)
//! - KEYR/MODEKEYR key pairs clear LOCK/FLOCK, writing LOCK sets both
//! - PAGE_ER + STRT erases the 64 byte page at FLASH_ADDR
//! - PAGE_PG stores go to a page buffer, PAGE_PG + STRT commits it with
//!   1 -> 0 only semantics

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::{DebugWire, Platform, RegisterBus};
use crate::regs::{Ctlr, DmReg, Reg, ERASED_WORD, KEY1, KEY2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read(Reg),
    Write(Reg, u32),
    ReadWord(u32),
    WriteWord(u32, u32),
}

#[derive(Debug, Default)]
pub(crate) struct MockBus {
    pub memory: BTreeMap<u32, u32>,
    pub regs: BTreeMap<Reg, u32>,
    pub log: Vec<Access>,
    pub locked: bool,
    pub fast_locked: bool,
    /// Key writes are ignored, the controller never unlocks
    pub stuck_locked: bool,
    /// Erases of this page silently do nothing
    pub broken_page: Option<u32>,
    /// Commits to this block silently do nothing
    pub broken_block: Option<u32>,
    pub erases: Vec<u32>,
    pub programs: Vec<u32>,
    key_stage: BTreeMap<Reg, bool>,
    buffer: [u32; 16],
    ctlr: u32,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            locked: true,
            fast_locked: true,
            buffer: [ERASED_WORD; 16],
            ..Default::default()
        }
    }

    pub fn unlocked() -> Self {
        Self {
            locked: false,
            fast_locked: false,
            ..Self::new()
        }
    }

    /// Preload bytes at an absolute address
    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            let a = addr + i as u32;
            let shift = (a & 3) * 8;
            let word = self.memory.entry(a & !3).or_insert(ERASED_WORD);
            *word = (*word & !(0xFF << shift)) | ((b as u32) << shift);
        }
    }

    pub fn bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| {
                let a = addr + i;
                let word = self.memory.get(&(a & !3)).copied().unwrap_or(ERASED_WORD);
                (word >> ((a & 3) * 8)) as u8
            })
            .collect()
    }

    pub fn writes_to(&self, reg: Reg) -> Vec<u32> {
        self.log
            .iter()
            .filter_map(|a| match a {
                Access::Write(r, v) if *r == reg => Some(*v),
                _ => None,
            })
            .collect()
    }

    fn key(&mut self, reg: Reg, value: u32) -> bool {
        let stage = self.key_stage.entry(reg).or_insert(false);
        match (value, *stage) {
            (KEY1, _) => {
                *stage = true;
                false
            }
            (KEY2, true) => {
                *stage = false;
                !self.stuck_locked
            }
            _ => {
                *stage = false;
                false
            }
        }
    }

    fn control(&mut self, value: u32) {
        let ctlr = Ctlr::from_bits_retain(value);
        if ctlr.contains(Ctlr::LOCK) {
            self.locked = true;
            self.fast_locked = true;
            self.ctlr = 0;
            return;
        }
        self.ctlr = value;
        let addr = self.regs.get(&Reg::FlashAddr).copied().unwrap_or(0);
        let writable = !self.locked && !self.fast_locked;

        if ctlr.contains(Ctlr::PAGE_ER | Ctlr::STRT) && writable {
            let page = addr & !63;
            self.erases.push(page);
            if self.broken_page != Some(page) {
                for i in 0..16 {
                    self.memory.insert(page + i * 4, ERASED_WORD);
                }
            }
        }
        if ctlr.contains(Ctlr::PAGE_PG | Ctlr::BUF_RST) {
            self.buffer = [ERASED_WORD; 16];
        }
        if ctlr.contains(Ctlr::PAGE_PG | Ctlr::STRT) && writable {
            let block = addr & !63;
            self.programs.push(block);
            if self.broken_block != Some(block) {
                for (i, w) in self.buffer.iter().enumerate() {
                    let slot = self.memory.entry(block + i as u32 * 4).or_insert(ERASED_WORD);
                    *slot &= *w;
                }
            }
        }
    }
}

impl RegisterBus for MockBus {
    fn read(&mut self, reg: Reg) -> u32 {
        self.log.push(Access::Read(reg));
        match reg {
            Reg::FlashCtlr => {
                let mut v = self.ctlr;
                if self.locked {
                    v |= Ctlr::LOCK.bits();
                }
                if self.fast_locked {
                    v |= Ctlr::FLOCK.bits();
                }
                v
            }
            Reg::FlashStatr => 0,
            _ => self.regs.get(&reg).copied().unwrap_or(0),
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.log.push(Access::Write(reg, value));
        match reg {
            Reg::FlashKeyr => {
                if self.key(reg, value) {
                    self.locked = false;
                }
            }
            Reg::FlashModekeyr => {
                if self.key(reg, value) {
                    self.fast_locked = false;
                }
            }
            Reg::FlashObkeyr | Reg::FlashBootModekeyr => {
                self.key(reg, value);
            }
            Reg::FlashCtlr => self.control(value),
            _ => {
                self.regs.insert(reg, value);
            }
        }
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        self.log.push(Access::ReadWord(addr));
        self.memory.get(&addr).copied().unwrap_or(ERASED_WORD)
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        self.log.push(Access::WriteWord(addr, value));
        if Ctlr::from_bits_retain(self.ctlr).contains(Ctlr::PAGE_PG) {
            self.buffer[((addr & 63) / 4) as usize] = value;
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockWire {
    pub writes: Vec<(DmReg, u32, u8)>,
}

impl DebugWire for MockWire {
    fn write_reg32(&mut self, reg: DmReg, value: u32, t1coeff: u8) {
        self.writes.push((reg, value, t1coeff));
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockPlatform {
    pub delays: Vec<u32>,
    pub interrupts_disabled: bool,
}

impl Platform for MockPlatform {
    fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
    }

    fn disable_interrupts(&mut self) {
        self.interrupts_disabled = true;
    }
}
