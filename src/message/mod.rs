// src/message/mod.rs

pub mod codec;
pub mod msg;

pub use codec::{PayloadReader, PayloadWriter};
pub use msg::{MessageType, Msg};
