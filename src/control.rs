//! Out-of-band command surface for the trace mask.
//!
//! Four ioctl-style opcodes exist. The three setters share one effect: they
//! install whatever mask the caller passes. `SET_ALL` and `SET_NONE` are
//! conventionally sent with every bit set or no bit set, but nothing checks
//! that.

use std::mem::size_of;

use thiserror::Error;
use tracing::info;

use crate::config::{TraceConfig, TraceMask};

pub const TRFS_IOC_MAGIC: u8 = b'T';

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, nr: u32) -> u32 {
    (dir << 30) | ((size_of::<u32>() as u32) << 16) | ((TRFS_IOC_MAGIC as u32) << 8) | nr
}

pub const TRFS_IOC_GET_MASK: u32 = ioc(IOC_READ, 1);
pub const TRFS_IOC_SET_ALL: u32 = ioc(IOC_WRITE, 2);
pub const TRFS_IOC_SET_NONE: u32 = ioc(IOC_WRITE, 3);
pub const TRFS_IOC_SET_MASK: u32 = ioc(IOC_WRITE, 4);

const MASK_ARG_LEN: usize = size_of::<u32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("control command requires an argument")]
    InvalidArgument,
    #[error("control argument of {0} bytes cannot hold a mask")]
    Fault(usize),
    #[error("unknown control command {0:#x}")]
    UnknownCommand(u32),
}

impl ControlError {
    /// The errno a caller of the raw channel sees.
    pub fn errno(&self) -> i32 {
        match self {
            ControlError::InvalidArgument => libc::EINVAL,
            ControlError::Fault(_) => libc::EFAULT,
            ControlError::UnknownCommand(_) => libc::ENOTTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    GetMask,
    SetAll(TraceMask),
    SetNone(TraceMask),
    SetMask(TraceMask),
}

impl ControlCommand {
    pub fn set_all() -> Self {
        ControlCommand::SetAll(TraceMask::EVERYTHING)
    }

    pub fn set_none() -> Self {
        ControlCommand::SetNone(TraceMask::empty())
    }

    pub fn opcode(&self) -> u32 {
        match self {
            ControlCommand::GetMask => TRFS_IOC_GET_MASK,
            ControlCommand::SetAll(_) => TRFS_IOC_SET_ALL,
            ControlCommand::SetNone(_) => TRFS_IOC_SET_NONE,
            ControlCommand::SetMask(_) => TRFS_IOC_SET_MASK,
        }
    }

    /// Decode a raw request and its argument.
    pub fn decode(cmd: u32, arg: Option<&[u8]>) -> Result<Self, ControlError> {
        if cmd == TRFS_IOC_GET_MASK {
            return Ok(ControlCommand::GetMask);
        }
        let build: fn(TraceMask) -> ControlCommand = match cmd {
            TRFS_IOC_SET_ALL => ControlCommand::SetAll,
            TRFS_IOC_SET_NONE => ControlCommand::SetNone,
            TRFS_IOC_SET_MASK => ControlCommand::SetMask,
            other => return Err(ControlError::UnknownCommand(other)),
        };
        let arg = arg.ok_or(ControlError::InvalidArgument)?;
        let raw: [u8; MASK_ARG_LEN] = arg
            .get(..MASK_ARG_LEN)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(ControlError::Fault(arg.len()))?;
        Ok(build(TraceMask::from_bits_retain(u32::from_ne_bytes(raw))))
    }
}

/// Apply a command, returning the mask in effect afterwards.
pub fn apply(config: &TraceConfig, command: ControlCommand) -> TraceMask {
    match command {
        ControlCommand::GetMask => config.mask(),
        ControlCommand::SetAll(mask)
        | ControlCommand::SetNone(mask)
        | ControlCommand::SetMask(mask) => {
            let previous = config.install(mask);
            info!(
                command = ?command,
                previous = previous.bits(),
                current = mask.bits(),
                "trace mask updated"
            );
            mask
        }
    }
}

/// Byte-level entry point, shaped like an ioctl handler.
///
/// `GET` copies the mask into `arg`; the setters read it from `arg`. On
/// error the mask is left untouched.
pub fn ioctl(config: &TraceConfig, cmd: u32, arg: Option<&mut [u8]>) -> Result<(), ControlError> {
    let command = ControlCommand::decode(cmd, arg.as_deref())?;
    if command == ControlCommand::GetMask {
        let out = arg.ok_or(ControlError::Fault(0))?;
        let len = out.len();
        let dest = out.get_mut(..MASK_ARG_LEN).ok_or(ControlError::Fault(len))?;
        dest.copy_from_slice(&config.mask().bits().to_ne_bytes());
        return Ok(());
    }
    apply(config, command);
    Ok(())
}
