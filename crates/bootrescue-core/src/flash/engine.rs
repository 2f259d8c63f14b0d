//! Page erase and block programming
//!
//! The controller erases 64 byte pages and programs 64 byte blocks through
//! a page buffer. Writes that do not cover a whole block are merged with
//! the existing flash contents before the block is (optionally) erased, so
//! the bytes around the written span survive.

use crate::error::{BulkFailure, EraseFailure, Error, PageFailure, Result, WriteFailure};
use crate::hal::RegisterBus;
use crate::layout::{BLOCK_SIZE, PAGE_SIZE, WORDS_PER_BLOCK};
use crate::regs::{Ctlr, Reg, ERASED_WORD};

const BLOCK_MASK: u32 = BLOCK_SIZE as u32 - 1;

/// Progress reporting for bulk writes
///
/// All methods default to doing nothing.
pub trait Progress {
    /// Called once before the first block with the number of blocks
    fn start(&mut self, _blocks: usize) {}

    /// Called after each block has been programmed and verified
    fn block_done(&mut self, _addr: u32, _bytes: usize) {}

    /// Called once after the last block
    fn finish(&mut self) {}
}

/// A no-op progress reporter
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

impl<P: Progress + ?Sized> Progress for &mut P {
    fn start(&mut self, blocks: usize) {
        (**self).start(blocks)
    }

    fn block_done(&mut self, addr: u32, bytes: usize) {
        (**self).block_done(addr, bytes)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

fn locked<B: RegisterBus + ?Sized>(bus: &mut B) -> bool {
    Ctlr::from_bits_retain(bus.read(Reg::FlashCtlr)).intersects(Ctlr::LOCKED)
}

fn write_ctlr<B: RegisterBus + ?Sized>(bus: &mut B, ctlr: Ctlr) {
    bus.write(Reg::FlashCtlr, ctlr.bits());
}

/// Erase the 64 byte page starting at `addr`
///
/// The first word is read back afterwards; anything other than all ones
/// is reported as a verify failure. There is no retry.
pub fn erase_page<B: RegisterBus + ?Sized>(bus: &mut B, addr: u32) -> Result<()> {
    if addr % PAGE_SIZE as u32 != 0 {
        return Err(Error::EraseFailed(EraseFailure::Misaligned { addr }));
    }
    if locked(bus) {
        log::error!("Flash is locked, cannot erase 0x{:08X}", addr);
        return Err(Error::EraseFailed(EraseFailure::Locked { addr }));
    }

    write_ctlr(bus, Ctlr::PAGE_ER);
    bus.write(Reg::FlashAddr, addr);
    write_ctlr(bus, Ctlr::STRT | Ctlr::PAGE_ER);
    bus.wait_idle();

    let found = bus.read_word(addr);
    if found != ERASED_WORD {
        log::error!("Erase of page 0x{:08X} failed, read 0x{:08X}", addr, found);
        return Err(Error::EraseFailed(EraseFailure::VerifyFailed { addr, found }));
    }
    log::trace!("Erased page 0x{:08X}", addr);
    Ok(())
}

/// Erase `count` consecutive pages starting at `start`
///
/// Stops at the first failure and reports the index of the failing page.
pub fn erase_pages<B: RegisterBus + ?Sized>(
    bus: &mut B,
    start: u32,
    count: u32,
) -> core::result::Result<(), PageFailure> {
    for index in 0..count {
        erase_page(bus, start + index * PAGE_SIZE as u32)
            .map_err(|error| PageFailure { index, error })?;
    }
    Ok(())
}

/// Build the 16 words to program into the block containing `dest`
///
/// Bytes outside `[dest, dest + data.len())` come from the current flash
/// contents. `data` must already be truncated to the block.
fn stage_block<B: RegisterBus + ?Sized>(
    bus: &mut B,
    block: u32,
    offset: usize,
    data: &[u8],
) -> [u32; WORDS_PER_BLOCK] {
    let mut words = [ERASED_WORD; WORDS_PER_BLOCK];
    let whole = offset == 0 && data.len() == BLOCK_SIZE;

    for (i, word) in words.iter_mut().enumerate() {
        let mut bytes = if whole {
            [0; 4]
        } else {
            bus.read_word(block + i as u32 * 4).to_le_bytes()
        };
        for (j, byte) in bytes.iter_mut().enumerate() {
            let pos = i * 4 + j;
            if pos >= offset && pos < offset + data.len() {
                *byte = data[pos - offset];
            }
        }
        *word = u32::from_le_bytes(bytes);
    }
    words
}

fn program_block<B: RegisterBus + ?Sized>(
    bus: &mut B,
    block: u32,
    words: &[u32; WORDS_PER_BLOCK],
) {
    write_ctlr(bus, Ctlr::PAGE_PG);
    write_ctlr(bus, Ctlr::BUF_RST | Ctlr::PAGE_PG);
    bus.write(Reg::FlashAddr, block);
    bus.wait_idle();

    for (i, &word) in words.iter().enumerate() {
        bus.write_word(block + i as u32 * 4, word);
        write_ctlr(bus, Ctlr::PAGE_PG | Ctlr::BUF_LOAD);
        bus.wait_idle();
    }

    write_ctlr(bus, Ctlr::PAGE_PG | Ctlr::STRT);
    bus.wait_idle();
}

/// Program up to one block of data at `dest`
///
/// `data` is truncated to 64 bytes and to the end of the block containing
/// `dest`. If the write does not cover the whole block, the untouched bytes
/// of the block are read from flash first and programmed back unchanged.
/// With `erase_first` the containing page is erased after staging.
///
/// Returns the number of bytes of `data` consumed.
pub fn write_block<B: RegisterBus + ?Sized>(
    bus: &mut B,
    dest: u32,
    data: &[u8],
    erase_first: bool,
) -> Result<usize> {
    if data.is_empty() {
        return Err(Error::EmptyWrite);
    }
    if locked(bus) {
        log::error!("Flash is locked, cannot write 0x{:08X}", dest);
        return Err(Error::WriteFailed(WriteFailure::Locked { addr: dest }));
    }

    let block = dest & !BLOCK_MASK;
    let offset = (dest & BLOCK_MASK) as usize;
    let len = core::cmp::min(data.len(), BLOCK_SIZE - offset);
    let words = stage_block(bus, block, offset, &data[..len]);

    if erase_first {
        erase_page(bus, block)?;
    }
    program_block(bus, block, &words);

    let found = bus.read_word(block);
    if found != words[0] {
        log::error!(
            "Write error at 0x{:08X}: expected 0x{:08X}, found 0x{:08X}",
            block,
            words[0],
            found
        );
        return Err(Error::WriteFailed(WriteFailure::VerifyFailed {
            addr: block,
            expected: words[0],
            found,
        }));
    }
    log::trace!("Programmed {} bytes at 0x{:08X}", len, dest);
    Ok(len)
}

fn blocks_spanned(dest: u32, len: usize) -> usize {
    let first = dest & !BLOCK_MASK;
    let end = dest as usize + len;
    (end - first as usize).div_ceil(BLOCK_SIZE)
}

/// Write `data` to `dest`, one block at a time
///
/// Stops at the first failure, reporting the byte offset of the failing
/// block relative to `dest`.
pub fn write_bulk<B, P>(
    bus: &mut B,
    dest: u32,
    data: &[u8],
    erase_first: bool,
    mut progress: P,
) -> core::result::Result<(), BulkFailure>
where
    B: RegisterBus + ?Sized,
    P: Progress,
{
    if data.is_empty() {
        return Err(BulkFailure {
            offset: 0,
            error: Error::EmptyWrite,
        });
    }

    log::debug!("Writing {} bytes to 0x{:08X}", data.len(), dest);
    progress.start(blocks_spanned(dest, data.len()));

    let mut done = 0usize;
    while done < data.len() {
        let addr = dest + done as u32;
        let consumed = write_block(bus, addr, &data[done..], erase_first).map_err(|error| {
            BulkFailure {
                offset: done as u32,
                error,
            }
        })?;
        progress.block_done(addr, consumed);
        done += consumed;
    }

    progress.finish();
    Ok(())
}

/// Copy `len` bytes of flash from `src` to `dest`, one block at a time
///
/// The source is read block by block right before each write, so the two
/// ranges must not overlap.
pub fn copy_region<B, P>(
    bus: &mut B,
    dest: u32,
    src: u32,
    len: usize,
    erase_first: bool,
    mut progress: P,
) -> core::result::Result<(), BulkFailure>
where
    B: RegisterBus + ?Sized,
    P: Progress,
{
    if len == 0 {
        return Err(BulkFailure {
            offset: 0,
            error: Error::EmptyWrite,
        });
    }

    log::debug!("Copying {} bytes from 0x{:08X} to 0x{:08X}", len, src, dest);
    progress.start(blocks_spanned(dest, len));

    let mut chunk = [0u8; BLOCK_SIZE];
    let mut done = 0usize;
    while done < len {
        let addr = dest + done as u32;
        let room = BLOCK_SIZE - (addr & BLOCK_MASK) as usize;
        let n = core::cmp::min(room, len - done);
        read(bus, src + done as u32, &mut chunk[..n]);

        let consumed = write_block(bus, addr, &chunk[..n], erase_first).map_err(|error| {
            BulkFailure {
                offset: done as u32,
                error,
            }
        })?;
        progress.block_done(addr, consumed);
        done += consumed;
    }

    progress.finish();
    Ok(())
}

/// Read flash contents into `buf`
pub fn read<B: RegisterBus + ?Sized>(bus: &mut B, addr: u32, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = bus.read_byte(addr + i as u32);
    }
}

/// Offset of the first byte at `addr` that differs from `expected`
pub fn first_mismatch<B: RegisterBus + ?Sized>(
    bus: &mut B,
    addr: u32,
    expected: &[u8],
) -> Option<u32> {
    expected
        .iter()
        .enumerate()
        .find(|&(i, &b)| bus.read_byte(addr + i as u32) != b)
        .map(|(i, _)| i as u32)
}

/// Offset of the first byte that differs between two flash ranges
pub fn first_mismatch_between<B: RegisterBus + ?Sized>(
    bus: &mut B,
    a: u32,
    b: u32,
    len: usize,
) -> Option<u32> {
    (0..len as u32).find(|&i| bus.read_byte(a + i) != bus.read_byte(b + i))
}
