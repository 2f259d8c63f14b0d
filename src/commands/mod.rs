//! CLI command implementations
//!
//! `simulate` boots the rescue firmware on the emulated chip and drives its
//! terminal; `layout` inspects the memory layout the firmware would use.

pub mod layout;
pub mod simulate;
