//! Hardware handles sharing one emulated [`Device`]
//!
//! The firmware owns its bus, debug wire and platform separately, while on
//! the chip all three reach the same silicon. Each handle holds a clone of
//! the same `Rc<RefCell<Device>>`.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use bootrescue_core::hal::{DebugWire, Platform, RegisterBus};
use bootrescue_core::regs::{DmReg, Reg};

use crate::device::Device;

/// Owner of the emulated chip, hands out hardware handles
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    device: Rc<RefCell<Device>>,
}

impl Simulator {
    /// Wrap a freshly reset device
    pub fn new() -> Self {
        Self::with_device(Device::new())
    }

    /// Wrap a prepared device
    pub fn with_device(device: Device) -> Self {
        Self {
            device: Rc::new(RefCell::new(device)),
        }
    }

    /// Inspect the device
    pub fn device(&self) -> Ref<'_, Device> {
        self.device.borrow()
    }

    /// Modify the device
    pub fn device_mut(&self) -> RefMut<'_, Device> {
        self.device.borrow_mut()
    }

    /// Register bus handle
    pub fn bus(&self) -> SimBus {
        SimBus {
            device: Rc::clone(&self.device),
        }
    }

    /// Debug wire handle
    pub fn wire(&self) -> SimWire {
        SimWire {
            device: Rc::clone(&self.device),
        }
    }

    /// Platform handle
    pub fn platform(&self) -> SimPlatform {
        SimPlatform {
            device: Rc::clone(&self.device),
        }
    }
}

/// [`RegisterBus`] onto the emulated chip
#[derive(Debug, Clone)]
pub struct SimBus {
    device: Rc<RefCell<Device>>,
}

impl RegisterBus for SimBus {
    fn read(&mut self, reg: Reg) -> u32 {
        self.device.borrow_mut().read_reg(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.device.borrow_mut().write_reg(reg, value)
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        self.device.borrow_mut().read_word(addr)
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        self.device.borrow_mut().write_word(addr, value)
    }

    fn wait_idle(&mut self) {
        // operations complete instantly
    }
}

/// [`DebugWire`] recording into the emulated chip
#[derive(Debug, Clone)]
pub struct SimWire {
    device: Rc<RefCell<Device>>,
}

impl DebugWire for SimWire {
    fn write_reg32(&mut self, reg: DmReg, value: u32, t1coeff: u8) {
        self.device.borrow_mut().debug_write(reg, value, t1coeff)
    }
}

/// [`Platform`] services with virtual time
#[derive(Debug, Clone)]
pub struct SimPlatform {
    device: Rc<RefCell<Device>>,
}

impl Platform for SimPlatform {
    fn delay_ms(&mut self, ms: u32) {
        self.device.borrow_mut().delay(ms)
    }

    fn disable_interrupts(&mut self) {
        self.device.borrow_mut().disable_interrupts()
    }
}
