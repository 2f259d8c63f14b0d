//! Debug module mailbox: link detection, debug port unlock and the
//! text console carried over DMDATA0/DMDATA1

mod console;
mod mailbox;
mod unlock;

pub use console::{
    decode_frame, decode_input, encode_frame, take_input, Console, Frame, CONSOLE_CAPACITY,
    FRAME_CHARS,
};
pub use mailbox::{clear, peer_present, read, Link};
pub use unlock::{attempt_unlock, DM_CONTROL_HALT, DM_CONTROL_RESUME, DM_OUTPUT_ENABLE};
