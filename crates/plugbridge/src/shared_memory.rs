//! Shared-memory audio channel between controller and host.
//!
//! One fixed-size region per audio configuration: a 56-byte header followed by
//! `num_inputs` input blocks and `num_outputs` output blocks, each exactly
//! `block_size` f32 samples. The controller creates and sizes the region
//! before sending init-audio; the host only opens an existing region and
//! refuses one whose header or byte length does not match the declared
//! configuration.
//!
//! There is no cross-process lock. Safety comes from the strict
//! request/response alternation of process-audio: the controller writes input
//! before sending the command and reads output only after the OK response.
//! The `host_ready`/`client_ready` header fields are kept for layout
//! compatibility but are advisory; neither side polls them.

use crate::error::{BridgeError, Result};
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::PathBuf;

/// Shm magic, `'RWAS'` little-endian.
pub const SHM_MAGIC: u32 = 0x5257_4153;
pub const SHM_VERSION: u32 = crate::protocol::PROTOCOL_VERSION;

/// 14 u32 fields: magic, version, num_inputs, num_outputs, block_size,
/// sample_rate, host_ready, client_ready, input_offset, output_offset,
/// reserved[4].
pub const SHM_HEADER_SIZE: usize = 56;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_NUM_INPUTS: usize = 8;
const OFF_NUM_OUTPUTS: usize = 12;
const OFF_BLOCK_SIZE: usize = 16;
const OFF_SAMPLE_RATE: usize = 20;
const OFF_HOST_READY: usize = 24;
const OFF_CLIENT_READY: usize = 28;
const OFF_INPUT_OFFSET: usize = 32;
const OFF_OUTPUT_OFFSET: usize = 36;

/// Audio configuration carried in the region header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub sample_rate: u32,
    pub block_size: u32,
    pub num_inputs: u32,
    pub num_outputs: u32,
}

impl ChannelConfig {
    /// Total byte length of a region with this configuration.
    pub fn required_size(&self) -> usize {
        SHM_HEADER_SIZE
            + (self.num_inputs + self.num_outputs) as usize
                * self.block_size as usize
                * std::mem::size_of::<f32>()
    }

    fn input_offset(&self) -> usize {
        SHM_HEADER_SIZE
    }

    fn output_offset(&self) -> usize {
        SHM_HEADER_SIZE
            + self.num_inputs as usize * self.block_size as usize * std::mem::size_of::<f32>()
    }
}

/// A mapped audio channel region.
///
/// Uses `UnsafeCell` for interior mutability since the underlying mapping is
/// shared between processes and is written through an immutable reference.
/// This is sound because block access is bounds-checked against the header
/// geometry and the request/response protocol guarantees only one side
/// touches the region at a time.
pub struct AudioChannel {
    mmap: UnsafeCell<MmapMut>,
    name: String,
    config: ChannelConfig,
    /// Creator owns the backing file and removes it on drop.
    owns_memory: bool,
}

impl AudioChannel {
    /// Create and size a region. This is the controller side of the
    /// contract; the host never creates.
    pub fn create(name: &str, config: ChannelConfig) -> Result<Self> {
        let path = Self::backing_path(name);
        let size = config.required_size();

        let file = open_backing_file(&path, true)?;
        file.set_len(size as u64).map_err(|e| {
            BridgeError::SharedMemoryError(format!("failed to size shared memory file: {e}"))
        })?;
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            BridgeError::SharedMemoryError(format!("failed to map shared memory: {e}"))
        })?;

        write_header(&mut mmap, &config);

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            config,
            owns_memory: true,
        })
    }

    /// Open an existing region and validate it against the expected
    /// configuration. Creation order is a protocol invariant: a missing or
    /// mismatched region is the controller's error, reported, never fixed up
    /// by resizing on this side.
    pub fn open(name: &str, expected: ChannelConfig) -> Result<Self> {
        let path = Self::backing_path(name);

        let file = open_backing_file(&path, false)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            BridgeError::SharedMemoryError(format!("failed to map shared memory: {e}"))
        })?;

        validate_header(&mmap, &expected)?;

        // Advisory only; the command flow never polls this.
        write_u32(&mut mmap, OFF_HOST_READY, 1);

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            config: expected,
            owns_memory: false,
        })
    }

    fn backing_path(name: &str) -> PathBuf {
        // The wire name may carry a leading '/' in the POSIX shm style.
        std::env::temp_dir().join(name.trim_start_matches('/'))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> ChannelConfig {
        self.config
    }

    fn block_at(&self, byte_offset: usize) -> &mut [f32] {
        // SAFETY: callers have bounds-checked byte_offset against the region
        // geometry; the mapping outlives self.
        let mmap = unsafe { &mut *self.mmap.get() };
        let bytes = &mut mmap[byte_offset..byte_offset + self.block_bytes()];
        unsafe {
            std::slice::from_raw_parts_mut(
                bytes.as_mut_ptr() as *mut f32,
                self.config.block_size as usize,
            )
        }
    }

    fn block_bytes(&self) -> usize {
        self.config.block_size as usize * std::mem::size_of::<f32>()
    }

    /// Full input block for one channel. Samples past a call's
    /// `num_samples` are undefined and must not be read.
    pub fn input_block(&self, channel: usize) -> Result<&mut [f32]> {
        if channel >= self.config.num_inputs as usize {
            return Err(BridgeError::SharedMemoryError(format!(
                "input channel {channel} out of bounds ({} inputs)",
                self.config.num_inputs
            )));
        }
        Ok(self.block_at(self.config.input_offset() + channel * self.block_bytes()))
    }

    /// Full output block for one channel.
    pub fn output_block(&self, channel: usize) -> Result<&mut [f32]> {
        if channel >= self.config.num_outputs as usize {
            return Err(BridgeError::SharedMemoryError(format!(
                "output channel {channel} out of bounds ({} outputs)",
                self.config.num_outputs
            )));
        }
        Ok(self.block_at(self.config.output_offset() + channel * self.block_bytes()))
    }

    /// Copy samples into an input block. Controller-side helper, also used
    /// by tests.
    pub fn write_input(&self, channel: usize, data: &[f32]) -> Result<()> {
        if data.len() > self.config.block_size as usize {
            return Err(BridgeError::SharedMemoryError(format!(
                "input data of {} samples exceeds block size {}",
                data.len(),
                self.config.block_size
            )));
        }
        let block = self.input_block(channel)?;
        block[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy samples out of an output block into a caller buffer. RT-safe.
    pub fn read_output_into(&self, channel: usize, output: &mut [f32]) -> Result<usize> {
        let block = self.output_block(channel)?;
        let count = output.len().min(block.len());
        output[..count].copy_from_slice(&block[..count]);
        Ok(count)
    }
}

// SAFETY: AudioChannel is Sync because:
// 1. The UnsafeCell<MmapMut> is only used for interior mutability.
// 2. Block access is bounds-checked against the declared geometry.
// 3. The protocol's request/response alternation means the two processes
//    never write the same region concurrently.
unsafe impl Sync for AudioChannel {}

impl Drop for AudioChannel {
    fn drop(&mut self) {
        if self.owns_memory {
            let _ = std::fs::remove_file(Self::backing_path(&self.name));
        }
    }
}

fn open_backing_file(path: &PathBuf, create: bool) -> Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if create {
        options.create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
    }
    options.open(path).map_err(|e| {
        BridgeError::SharedMemoryError(format!(
            "failed to open shared memory file {}: {e}",
            path.display()
        ))
    })
}

fn write_u32(mmap: &mut MmapMut, offset: usize, value: u32) {
    mmap[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_header_u32(mmap: &MmapMut, offset: usize) -> u32 {
    u32::from_le_bytes([
        mmap[offset],
        mmap[offset + 1],
        mmap[offset + 2],
        mmap[offset + 3],
    ])
}

fn write_header(mmap: &mut MmapMut, config: &ChannelConfig) {
    write_u32(mmap, OFF_MAGIC, SHM_MAGIC);
    write_u32(mmap, OFF_VERSION, SHM_VERSION);
    write_u32(mmap, OFF_NUM_INPUTS, config.num_inputs);
    write_u32(mmap, OFF_NUM_OUTPUTS, config.num_outputs);
    write_u32(mmap, OFF_BLOCK_SIZE, config.block_size);
    write_u32(mmap, OFF_SAMPLE_RATE, config.sample_rate);
    write_u32(mmap, OFF_HOST_READY, 0);
    write_u32(mmap, OFF_CLIENT_READY, 0);
    write_u32(mmap, OFF_INPUT_OFFSET, config.input_offset() as u32);
    write_u32(mmap, OFF_OUTPUT_OFFSET, config.output_offset() as u32);
}

fn validate_header(mmap: &MmapMut, expected: &ChannelConfig) -> Result<()> {
    if mmap.len() < SHM_HEADER_SIZE {
        return Err(BridgeError::SharedMemoryError(format!(
            "region of {} bytes is smaller than the header",
            mmap.len()
        )));
    }

    let magic = read_header_u32(mmap, OFF_MAGIC);
    if magic != SHM_MAGIC {
        return Err(BridgeError::SharedMemoryError(format!(
            "bad shm magic {magic:#010x}"
        )));
    }
    let version = read_header_u32(mmap, OFF_VERSION);
    if version != SHM_VERSION {
        return Err(BridgeError::SharedMemoryError(format!(
            "shm version mismatch: got {version}, expected {SHM_VERSION}"
        )));
    }

    let header = ChannelConfig {
        sample_rate: read_header_u32(mmap, OFF_SAMPLE_RATE),
        block_size: read_header_u32(mmap, OFF_BLOCK_SIZE),
        num_inputs: read_header_u32(mmap, OFF_NUM_INPUTS),
        num_outputs: read_header_u32(mmap, OFF_NUM_OUTPUTS),
    };
    if header != *expected {
        return Err(BridgeError::SharedMemoryError(format!(
            "shm geometry mismatch: header {header:?}, init-audio {expected:?}"
        )));
    }

    let required = expected.required_size();
    if mmap.len() < required {
        return Err(BridgeError::SharedMemoryError(format!(
            "region of {} bytes is smaller than the {required} bytes this configuration needs",
            mmap.len()
        )));
    }

    let input_offset = read_header_u32(mmap, OFF_INPUT_OFFSET) as usize;
    let output_offset = read_header_u32(mmap, OFF_OUTPUT_OFFSET) as usize;
    if input_offset != expected.input_offset() || output_offset != expected.output_offset() {
        return Err(BridgeError::SharedMemoryError(format!(
            "shm offsets mismatch: header {input_offset}/{output_offset}, expected {}/{}",
            expected.input_offset(),
            expected.output_offset()
        )));
    }

    Ok(())
}
