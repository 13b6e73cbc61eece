//! Shared wire surface for the plugbridge host
//!
//! This crate defines everything both ends of the bridge must agree on: the
//! fixed-layout command protocol spoken over TCP, the shared-memory audio
//! channel, and the error taxonomy. The host-side implementation is in
//! `plugbridge-host`.
//!
//! ## Layout stability
//!
//! Every wire struct has a byte-exact little-endian layout with fixed-size,
//! NUL-terminated string fields. The encoders and decoders here are the
//! single source of truth for those layouts; controllers written in other
//! languages mirror them field for field.
//!
//! ## Usage
//!
//! ```ignore
//! use plugbridge::protocol::{Command, RequestHeader, LoadPluginCmd};
//!
//! let cmd = LoadPluginCmd {
//!     path: "/path/to/plugin.vst3".into(),
//!     class_index: 0,
//! };
//! let header = RequestHeader::new(Command::LoadPlugin, LoadPluginCmd::SIZE as u32);
//! stream.write_all(&header.to_bytes())?;
//! stream.write_all(&cmd.to_bytes())?;
//! ```

pub mod error;
pub use error::{BridgeError, LoadStage, Result};

pub mod protocol;
pub use protocol::{
    Command, EditorInfoResp, InitAudioCmd, LoadPluginCmd, MidiEventRec, ParamChangesResp,
    ParamInfoResp, ParamValue, PluginInfoResp, ProcessAudioCmd, RequestHeader, ResponseHeader,
    SendMidiCmd, SetParamCmd, Status,
};

pub mod shared_memory;
pub use shared_memory::{AudioChannel, ChannelConfig};
