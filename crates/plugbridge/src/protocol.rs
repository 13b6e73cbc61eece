//! Wire protocol for the plugin bridge.
//!
//! Every message is a fixed-layout, little-endian byte structure shared with
//! the controller process, which may not be written in Rust. Nothing here goes
//! through a serialization framework; each payload knows its exact size and
//! encodes itself field by field.
//!
//! Framing discipline: the controller sends a 16-byte request header plus
//! payload, the host answers with a 12-byte response header plus payload, and
//! requests are strictly sequential on one connection. Distinct magics on the
//! two directions make a misaligned stream fail immediately.

use crate::error::{BridgeError, Result};
use std::path::{Path, PathBuf};

/// Request magic, `'RWNH'` little-endian.
pub const REQUEST_MAGIC: u32 = 0x484E_5752;
/// Response magic, `'RWNR'` little-endian.
pub const RESPONSE_MAGIC: u32 = 0x524E_5752;
pub const PROTOCOL_VERSION: u32 = 1;

/// Port range the host scans for a free listener. The chosen port is
/// announced on stdout as `PORT=<n>` for the controller to parse.
pub const PORT_RANGE_START: u16 = 47100;
pub const PORT_RANGE_END: u16 = 47199;

pub const REQUEST_HEADER_SIZE: usize = 16;
pub const RESPONSE_HEADER_SIZE: usize = 12;

pub const PATH_LEN: usize = 1024;
pub const SHM_NAME_LEN: usize = 64;
pub const INFO_NAME_LEN: usize = 256;
pub const INFO_VENDOR_LEN: usize = 256;
pub const INFO_CATEGORY_LEN: usize = 128;
pub const INFO_UID_LEN: usize = 64;
pub const PARAM_NAME_LEN: usize = 128;
pub const PARAM_UNITS_LEN: usize = 32;

/// Plugin-info flag bits.
pub const INFO_FLAG_HAS_PROCESSOR: u32 = 1 << 0;
pub const INFO_FLAG_HAS_CONTROLLER: u32 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Ping = 1,
    LoadPlugin = 2,
    UnloadPlugin = 3,
    GetInfo = 4,
    GetParamCount = 7,
    GetParamInfo = 8,
    GetParam = 9,
    SetParam = 10,
    SendMidi = 11,
    GetState = 12,
    SetState = 13,
    OpenEditor = 14,
    CloseEditor = 15,
    GetEditorSize = 16,
    GetParamChanges = 17,
    InitAudio = 20,
    ProcessAudio = 21,
    Shutdown = 99,
}

impl Command {
    /// Unknown command codes stay routable: the dispatcher answers them with
    /// a generic error instead of dropping the connection.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Command::Ping),
            2 => Some(Command::LoadPlugin),
            3 => Some(Command::UnloadPlugin),
            4 => Some(Command::GetInfo),
            7 => Some(Command::GetParamCount),
            8 => Some(Command::GetParamInfo),
            9 => Some(Command::GetParam),
            10 => Some(Command::SetParam),
            11 => Some(Command::SendMidi),
            12 => Some(Command::GetState),
            13 => Some(Command::SetState),
            14 => Some(Command::OpenEditor),
            15 => Some(Command::CloseEditor),
            16 => Some(Command::GetEditorSize),
            17 => Some(Command::GetParamChanges),
            20 => Some(Command::InitAudio),
            21 => Some(Command::ProcessAudio),
            99 => Some(Command::Shutdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Error = 1,
    NotLoaded = 2,
    NotInitialized = 3,
    InvalidParam = 4,
}

impl Status {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Status::Ok),
            1 => Some(Status::Error),
            2 => Some(Status::NotLoaded),
            3 => Some(Status::NotInitialized),
            4 => Some(Status::InvalidParam),
            _ => None,
        }
    }
}

/// Copy `s` into a fixed NUL-padded field, truncating to `N - 1` bytes so the
/// result is always NUL-terminated. Overflow is not an error.
fn write_fixed_str<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

/// Read a NUL-terminated string out of a fixed field.
fn read_fixed_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn read_f64(buf: &[u8], offset: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    f64::from_le_bytes(bytes)
}

fn check_len(buf: &[u8], expected: usize, what: &str) -> Result<()> {
    if buf.len() < expected {
        return Err(BridgeError::ProtocolError(format!(
            "short {what}: {} bytes, expected {expected}",
            buf.len()
        )));
    }
    Ok(())
}

/// 16-byte request frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Raw command code; may not correspond to a known [`Command`].
    pub command: u32,
    pub payload_size: u32,
}

impl RequestHeader {
    pub fn new(command: Command, payload_size: u32) -> Self {
        Self {
            command: command as u32,
            payload_size,
        }
    }

    pub fn to_bytes(&self) -> [u8; REQUEST_HEADER_SIZE] {
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        buf[0..4].copy_from_slice(&REQUEST_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.command.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    /// Validates magic and version. Both failures are fatal to the
    /// connection; the caller must close without responding.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, REQUEST_HEADER_SIZE, "request header")?;
        let magic = read_u32(buf, 0);
        if magic != REQUEST_MAGIC {
            return Err(BridgeError::ProtocolError(format!(
                "bad request magic {magic:#010x}"
            )));
        }
        let version = read_u32(buf, 4);
        if version != PROTOCOL_VERSION {
            return Err(BridgeError::ProtocolError(format!(
                "protocol version mismatch: got {version}, expected {PROTOCOL_VERSION}"
            )));
        }
        Ok(Self {
            command: read_u32(buf, 8),
            payload_size: read_u32(buf, 12),
        })
    }
}

/// 12-byte response frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: Status,
    pub payload_size: u32,
}

impl ResponseHeader {
    pub fn new(status: Status, payload_size: u32) -> Self {
        Self {
            status,
            payload_size,
        }
    }

    pub fn to_bytes(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&RESPONSE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&(self.status as u32).to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, RESPONSE_HEADER_SIZE, "response header")?;
        let magic = read_u32(buf, 0);
        if magic != RESPONSE_MAGIC {
            return Err(BridgeError::ProtocolError(format!(
                "bad response magic {magic:#010x}"
            )));
        }
        let status = Status::from_u32(read_u32(buf, 4)).ok_or_else(|| {
            BridgeError::ProtocolError(format!("unknown status {}", read_u32(buf, 4)))
        })?;
        Ok(Self {
            status,
            payload_size: read_u32(buf, 8),
        })
    }
}

/// `LoadPlugin` payload: module path plus the index of the audio-module
/// class to instantiate within the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPluginCmd {
    pub path: PathBuf,
    pub class_index: u32,
}

impl LoadPluginCmd {
    pub const SIZE: usize = PATH_LEN + 4;

    pub fn new(path: &Path, class_index: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            class_index,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&write_fixed_str::<PATH_LEN>(
            &self.path.to_string_lossy(),
        ));
        buf.extend_from_slice(&self.class_index.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "load-plugin payload")?;
        Ok(Self {
            path: PathBuf::from(read_fixed_str(&buf[..PATH_LEN])),
            class_index: read_u32(buf, PATH_LEN),
        })
    }
}

/// `InitAudio` payload. The shm region named here must already exist,
/// created and sized by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitAudioCmd {
    pub sample_rate: u32,
    pub block_size: u32,
    pub num_inputs: u32,
    pub num_outputs: u32,
    pub shm_name: String,
}

impl InitAudioCmd {
    pub const SIZE: usize = 16 + SHM_NAME_LEN;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.sample_rate.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.num_inputs.to_le_bytes());
        buf.extend_from_slice(&self.num_outputs.to_le_bytes());
        buf.extend_from_slice(&write_fixed_str::<SHM_NAME_LEN>(&self.shm_name));
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "init-audio payload")?;
        Ok(Self {
            sample_rate: read_u32(buf, 0),
            block_size: read_u32(buf, 4),
            num_inputs: read_u32(buf, 8),
            num_outputs: read_u32(buf, 12),
            shm_name: read_fixed_str(&buf[16..16 + SHM_NAME_LEN]),
        })
    }
}

/// `ProcessAudio` payload. `num_samples` may be less than the configured
/// block size on the final block of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessAudioCmd {
    pub num_samples: u32,
}

impl ProcessAudioCmd {
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.num_samples.to_le_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "process-audio payload")?;
        Ok(Self {
            num_samples: read_u32(buf, 0),
        })
    }
}

/// `SetParam` payload. The pad keeps the f64 naturally aligned in the C
/// layout on the controller side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetParamCmd {
    pub param_id: u32,
    pub value: f64,
}

impl SetParamCmd {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.param_id.to_le_bytes());
        buf[8..].copy_from_slice(&self.value.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "set-param payload")?;
        Ok(Self {
            param_id: read_u32(buf, 0),
            value: read_f64(buf, 8),
        })
    }
}

/// `GetParamChanges` record: a parameter id with a normalized value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamValue {
    pub param_id: u32,
    pub value: f64,
}

impl ParamValue {
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.param_id.to_le_bytes());
        buf[4..12].copy_from_slice(&self.value.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "param value")?;
        Ok(Self {
            param_id: read_u32(buf, 0),
            value: read_f64(buf, 4),
        })
    }
}

/// One raw MIDI event: an in-block sample offset plus status/data1/data2
/// (the fourth byte is padding on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEventRec {
    pub sample_offset: u32,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiEventRec {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sample_offset.to_le_bytes());
        buf[4] = self.status;
        buf[5] = self.data1;
        buf[6] = self.data2;
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "midi event")?;
        Ok(Self {
            sample_offset: read_u32(buf, 0),
            status: buf[4],
            data1: buf[5],
            data2: buf[6],
        })
    }
}

/// `SendMidi` payload: an event count followed by that many records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMidiCmd {
    pub events: Vec<MidiEventRec>,
}

impl SendMidiCmd {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.events.len() * MidiEventRec::SIZE);
        buf.extend_from_slice(&(self.events.len() as u32).to_le_bytes());
        for event in &self.events {
            buf.extend_from_slice(&event.to_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, 4, "send-midi payload")?;
        let count = read_u32(buf, 0) as usize;
        check_len(buf, 4 + count * MidiEventRec::SIZE, "send-midi events")?;
        let mut events = Vec::with_capacity(count);
        for i in 0..count {
            let offset = 4 + i * MidiEventRec::SIZE;
            events.push(MidiEventRec::from_bytes(
                &buf[offset..offset + MidiEventRec::SIZE],
            )?);
        }
        Ok(Self { events })
    }
}

/// `GetInfo` response. String fields truncate; `uid` carries the class id
/// hex-encoded. `flags` uses the `INFO_FLAG_*` bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfoResp {
    pub name: String,
    pub vendor: String,
    pub category: String,
    pub uid: String,
    pub num_params: u32,
    pub num_inputs: u32,
    pub num_outputs: u32,
    pub flags: u32,
}

impl PluginInfoResp {
    pub const SIZE: usize =
        INFO_NAME_LEN + INFO_VENDOR_LEN + INFO_CATEGORY_LEN + INFO_UID_LEN + 16;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&write_fixed_str::<INFO_NAME_LEN>(&self.name));
        buf.extend_from_slice(&write_fixed_str::<INFO_VENDOR_LEN>(&self.vendor));
        buf.extend_from_slice(&write_fixed_str::<INFO_CATEGORY_LEN>(&self.category));
        buf.extend_from_slice(&write_fixed_str::<INFO_UID_LEN>(&self.uid));
        buf.extend_from_slice(&self.num_params.to_le_bytes());
        buf.extend_from_slice(&self.num_inputs.to_le_bytes());
        buf.extend_from_slice(&self.num_outputs.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "plugin-info payload")?;
        let mut offset = 0;
        let name = read_fixed_str(&buf[offset..offset + INFO_NAME_LEN]);
        offset += INFO_NAME_LEN;
        let vendor = read_fixed_str(&buf[offset..offset + INFO_VENDOR_LEN]);
        offset += INFO_VENDOR_LEN;
        let category = read_fixed_str(&buf[offset..offset + INFO_CATEGORY_LEN]);
        offset += INFO_CATEGORY_LEN;
        let uid = read_fixed_str(&buf[offset..offset + INFO_UID_LEN]);
        offset += INFO_UID_LEN;
        Ok(Self {
            name,
            vendor,
            category,
            uid,
            num_params: read_u32(buf, offset),
            num_inputs: read_u32(buf, offset + 4),
            num_outputs: read_u32(buf, offset + 8),
            flags: read_u32(buf, offset + 12),
        })
    }
}

/// `GetParamInfo` response. Min/max are always the normalized 0..1 range.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfoResp {
    pub id: u32,
    pub name: String,
    pub units: String,
    pub default_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub flags: u32,
}

impl ParamInfoResp {
    pub const SIZE: usize = 4 + PARAM_NAME_LEN + PARAM_UNITS_LEN + 24 + 4;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&write_fixed_str::<PARAM_NAME_LEN>(&self.name));
        buf.extend_from_slice(&write_fixed_str::<PARAM_UNITS_LEN>(&self.units));
        buf.extend_from_slice(&self.default_value.to_le_bytes());
        buf.extend_from_slice(&self.min_value.to_le_bytes());
        buf.extend_from_slice(&self.max_value.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "param-info payload")?;
        Ok(Self {
            id: read_u32(buf, 0),
            name: read_fixed_str(&buf[4..4 + PARAM_NAME_LEN]),
            units: read_fixed_str(&buf[132..132 + PARAM_UNITS_LEN]),
            default_value: read_f64(buf, 164),
            min_value: read_f64(buf, 172),
            max_value: read_f64(buf, 180),
            flags: read_u32(buf, 188),
        })
    }
}

/// `OpenEditor` / `GetEditorSize` response: native window id plus the
/// current editor size in pixels. A zero window id means no window exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditorInfoResp {
    pub window_id: u32,
    pub width: u32,
    pub height: u32,
}

impl EditorInfoResp {
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.window_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.width.to_le_bytes());
        buf[8..12].copy_from_slice(&self.height.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, Self::SIZE, "editor-info payload")?;
        Ok(Self {
            window_id: read_u32(buf, 0),
            width: read_u32(buf, 4),
            height: read_u32(buf, 8),
        })
    }
}

/// `GetParamChanges` response: GUI-originated edits drained from the host's
/// edit queue, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamChangesResp {
    pub changes: Vec<ParamValue>,
}

impl ParamChangesResp {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.changes.len() * ParamValue::SIZE);
        buf.extend_from_slice(&(self.changes.len() as u32).to_le_bytes());
        for change in &self.changes {
            buf.extend_from_slice(&change.to_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        check_len(buf, 4, "param-changes payload")?;
        let count = read_u32(buf, 0) as usize;
        check_len(buf, 4 + count * ParamValue::SIZE, "param-changes records")?;
        let mut changes = Vec::with_capacity(count);
        for i in 0..count {
            let offset = 4 + i * ParamValue::SIZE;
            changes.push(ParamValue::from_bytes(
                &buf[offset..offset + ParamValue::SIZE],
            )?);
        }
        Ok(Self { changes })
    }
}
