//! Wire protocol shared by the BX master and slave services.
//!
//! A slave talks to the master over a single long-lived TCP connection
//! carrying length-prefixed frames, each frame a JSON-encoded message:
//!
//! - [`message::SlaveMessage`] carries everything a slave sends: the
//!   `SystemInfo` handshake, periodic `StatusUpdate`s, and one `CommandDone`
//!   per command.
//! - [`message::MasterMessage`] carries everything the master sends:
//!   `RunCommand` dispatches and a final `Quit`.
//!
//! Both peers must build their codec through [`framing::frame_codec`] so the
//! frame size limit stays consistent on each end.

pub mod error;
pub mod framing;
pub mod message;
pub mod prelude;

pub use message::{
    MasterMessage, RunCommandRequest, SlaveMessage, SlaveStatus, SlaveSystemInfo,
};
