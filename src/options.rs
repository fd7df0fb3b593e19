// src/options.rs

//! Configuration for contexts, sessions and the TCP router.
//!
//! Each struct can be filled directly or through `set_option` with an integer
//! option id and a native-endian byte value.

use crate::error::{CoraError, CoraResult};
use std::time::Duration;

// --- Option ids ---
pub const EVENT_QUEUE_HIGH_WATER: i32 = 1;
pub const MONITOR_CAPACITY: i32 = 2;
pub const APPLICATION_NAME: i32 = 3;
pub const TCP_NODELAY: i32 = 10;
pub const CONNECT_TIMEOUT: i32 = 11;
pub const MAX_FRAME_LEN: i32 = 12;

/// Default application name sent with the logon command.
pub const DEFAULT_APPLICATION_NAME: &str = "rcora";
/// Default capacity of a session monitor channel.
pub const DEFAULT_MONITOR_CAPACITY: usize = 100;
/// Largest frame body the TCP router accepts by default.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Options applied when a `Context` is created.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
  /// Pending-event count above which posting logs a warning. The queue
  /// itself is unbounded and never drops events; `None` disables the
  /// warning.
  pub event_queue_high_water: Option<usize>,
}

impl ContextOptions {
  pub fn set_option(&mut self, option: i32, value: &[u8]) -> CoraResult<()> {
    match option {
      EVENT_QUEUE_HIGH_WATER => {
        // 0 or -1 disables the warning.
        self.event_queue_high_water = match parse_i32_option(option, value)? {
          -1 | 0 => None,
          n if n > 0 => Some(n as usize),
          _ => return Err(CoraError::InvalidOptionValue(option)),
        };
        Ok(())
      }
      _ => Err(CoraError::InvalidOption(option)),
    }
  }
}

/// Options applied to a `Session`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
  pub monitor_capacity: usize,
  pub application_name: String,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      monitor_capacity: DEFAULT_MONITOR_CAPACITY,
      application_name: DEFAULT_APPLICATION_NAME.to_string(),
    }
  }
}

impl SessionOptions {
  pub fn set_option(&mut self, option: i32, value: &[u8]) -> CoraResult<()> {
    match option {
      MONITOR_CAPACITY => {
        self.monitor_capacity = parse_capacity_option(option, value)?;
        Ok(())
      }
      APPLICATION_NAME => {
        let name = std::str::from_utf8(value).map_err(|_| CoraError::InvalidOptionValue(option))?;
        if name.is_empty() || name.len() > u16::MAX as usize {
          return Err(CoraError::InvalidOptionValue(option));
        }
        self.application_name = name.to_string();
        Ok(())
      }
      _ => Err(CoraError::InvalidOption(option)),
    }
  }
}

/// Settings for `TcpRouter` connections.
#[derive(Debug, Clone)]
pub struct TcpRouterConfig {
  pub tcp_nodelay: bool,
  /// `None` waits for the OS connect timeout.
  pub connect_timeout: Option<Duration>,
  pub max_frame_len: usize,
}

impl Default for TcpRouterConfig {
  fn default() -> Self {
    Self {
      tcp_nodelay: true,
      connect_timeout: Some(Duration::from_secs(10)),
      max_frame_len: DEFAULT_MAX_FRAME_LEN,
    }
  }
}

impl TcpRouterConfig {
  pub fn set_option(&mut self, option: i32, value: &[u8]) -> CoraResult<()> {
    match option {
      TCP_NODELAY => self.tcp_nodelay = parse_bool_option(option, value)?,
      CONNECT_TIMEOUT => self.connect_timeout = parse_duration_ms_option(option, value)?,
      MAX_FRAME_LEN => self.max_frame_len = parse_capacity_option(option, value)?,
      _ => return Err(CoraError::InvalidOption(option)),
    }
    Ok(())
  }
}

// --- Helper functions for parsing option values ---

/// Parses a native-endian `i32` option value.
pub(crate) fn parse_i32_option(option: i32, value: &[u8]) -> CoraResult<i32> {
  let arr: [u8; 4] = value.try_into().map_err(|_| CoraError::InvalidOptionValue(option))?;
  Ok(i32::from_ne_bytes(arr))
}

/// Parses a boolean option (0 or 1).
pub(crate) fn parse_bool_option(option: i32, value: &[u8]) -> CoraResult<bool> {
  match parse_i32_option(option, value)? {
    0 => Ok(false),
    1 => Ok(true),
    _ => Err(CoraError::InvalidOptionValue(option)),
  }
}

/// Parses a millisecond duration. -1 means no limit.
pub(crate) fn parse_duration_ms_option(option: i32, value: &[u8]) -> CoraResult<Option<Duration>> {
  let val = parse_i32_option(option, value)?;
  match val {
    -1 => Ok(None),
    0.. => Ok(Some(Duration::from_millis(val as u64))),
    _ => Err(CoraError::InvalidOptionValue(option)),
  }
}

/// Parses a strictly positive size or capacity.
pub(crate) fn parse_capacity_option(option: i32, value: &[u8]) -> CoraResult<usize> {
  match parse_i32_option(option, value)? {
    n if n > 0 => Ok(n as usize),
    _ => Err(CoraError::InvalidOptionValue(option)),
  }
}
