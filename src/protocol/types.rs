// src/protocol/types.rs

//! Message type codes.
//!
//! Commands are odd, their acknowledgements the next even code. Codes and
//! field layouts are a contract with the server version.

use crate::message::MessageType;

// --- Session level ---
pub const LOGON_CMD: MessageType = MessageType(1);
pub const LOGON_ACK: MessageType = MessageType(2);
pub const OPEN_DEVICE_CMD: MessageType = MessageType(3);
pub const OPEN_DEVICE_ACK: MessageType = MessageType(4);

// --- Device transactions ---
pub const TABLE_RESET_CMD: MessageType = MessageType(101);
pub const TABLE_RESET_ACK: MessageType = MessageType(102);
pub const VARIABLE_SET_CMD: MessageType = MessageType(103);
pub const VARIABLE_SET_ACK: MessageType = MessageType(104);
pub const CLOCK_SET_CMD: MessageType = MessageType(105);
pub const CLOCK_SET_ACK: MessageType = MessageType(106);
pub const FILE_RECEIVE_CMD: MessageType = MessageType(107);
pub const FILE_RECEIVE_ACK: MessageType = MessageType(108);
pub const FILE_RECEIVE_CONT_CMD: MessageType = MessageType(109);
pub const LOG_MONITOR_START_CMD: MessageType = MessageType(111);
pub const LOG_MONITOR_NOT: MessageType = MessageType(112);
pub const LOG_MONITOR_CONT_CMD: MessageType = MessageType(113);
