//! Binary debug sub-protocol and hex codec.
//!
//! Debug frames arrive as the hex payload of a `DEBUG:` command, are
//! rewritten in place inside a fixed 4096-byte buffer, and go back out as
//! hex. The first byte of a frame is the function code; responses carry a
//! status byte (`0x7E` success, `0x81` out of bounds, `0x82` out of
//! memory). The processor talks to the program through [`DebugTarget`] so
//! the wire logic is independent of the loaded artifact.

use tracing::error;

/// Size of the in-place frame buffer; responses never outgrow it.
pub const MAX_DEBUG_FRAME: usize = 4096;

/// Most indexes one `0x44` request may carry.
pub const MAX_LIST_INDEXES: usize = 256;

const FC_DEBUG_INFO: u8 = 0x41;
const FC_DEBUG_SET: u8 = 0x42;
const FC_DEBUG_GET: u8 = 0x43;
const FC_DEBUG_GET_LIST: u8 = 0x44;
const FC_DEBUG_GET_MD5: u8 = 0x45;

const STATUS_SUCCESS: u8 = 0x7E;
const STATUS_OUT_OF_BOUNDS: u8 = 0x81;
const STATUS_OUT_OF_MEMORY: u8 = 0x82;

/// Byte order the debug client asked the program to emit values in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Client and program agree.
    Same,
    /// Program must byte-swap values for the client.
    Reversed,
}

impl ByteOrder {
    /// Wire code passed to the program's `set_endianness`.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Same => 0,
            Self::Reversed => 1,
        }
    }
}

/// Debug view of a loaded program: variable inventory, trace/force control,
/// endianness selection, artifact MD5. Implemented by the program handle
/// over its optional symbols and by in-memory fakes in tests; a method
/// answering `None`/`false` marks the capability unbound.
pub trait DebugTarget {
    /// Number of traceable variables.
    fn variable_count(&self) -> Option<u16>;

    /// Copy of the current value bytes of one variable.
    fn variable_bytes(&self, index: u16) -> Option<Vec<u8>>;

    /// Mark a variable for tracing and optionally force its value.
    fn set_trace(&self, index: u16, force: bool, value: Option<&[u8]>) -> bool;

    /// Select the byte order of subsequent value transfers.
    fn set_endianness(&self, order: ByteOrder) -> bool;

    /// ASCII MD5 of the loaded artifact.
    fn md5(&self) -> Option<String>;
}

/// Parse a space-separated hex string into bytes.
///
/// Each token contributes one byte from its leading hex digits (at most
/// two); the first token without any leading hex digit stops the parse.
/// An empty result means nothing was parseable.
#[must_use]
pub fn parse_hex(text: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    for token in text.split(' ') {
        if token.is_empty() {
            continue;
        }
        let digits: String = token
            .chars()
            .take_while(char::is_ascii_hexdigit)
            .take(2)
            .collect();
        let Ok(byte) = u8::from_str_radix(&digits, 16) else {
            break;
        };
        bytes.push(byte);
    }
    bytes
}

/// Render bytes as lowercase two-digit hex pairs separated by single
/// spaces, preceded by `prefix`.
#[must_use]
pub fn format_hex(bytes: &[u8], prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + bytes.len() * 3);
    out.push_str(prefix);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Process one debug frame in place.
///
/// `frame` is the request buffer (zero-padded to [`MAX_DEBUG_FRAME`]) whose
/// first `length` bytes carry the request; the response overwrites it.
/// Returns the response length, or 0 when the frame cannot be processed
/// (unknown function code, unbound debug capability, empty frame).
pub fn process_frame(
    target: &dyn DebugTarget,
    tick: u32,
    frame: &mut [u8],
    length: usize,
) -> usize {
    if length == 0 || frame.len() < 10 {
        return 0;
    }
    match frame[0] {
        FC_DEBUG_INFO => debug_info(target, frame),
        FC_DEBUG_SET => {
            let index = read_u16(frame, 1);
            let flag = frame[3];
            let value_len = read_u16(frame, 4) as usize;
            debug_set(target, frame, index, flag, value_len)
        }
        FC_DEBUG_GET => {
            let start = read_u16(frame, 1);
            let end = read_u16(frame, 3);
            debug_get(target, tick, frame, start, end)
        }
        FC_DEBUG_GET_LIST => {
            let count = read_u16(frame, 1) as usize;
            debug_get_list(target, tick, frame, count)
        }
        FC_DEBUG_GET_MD5 => debug_get_md5(target, frame),
        other => {
            error!("unknown debug function code 0x{other:02X}");
            0
        }
    }
}

fn debug_info(target: &dyn DebugTarget, frame: &mut [u8]) -> usize {
    let Some(count) = target.variable_count() else {
        return 0;
    };
    frame[0] = FC_DEBUG_INFO;
    frame[1..3].copy_from_slice(&count.to_be_bytes());
    3
}

fn debug_set(
    target: &dyn DebugTarget,
    frame: &mut [u8],
    index: u16,
    flag: u8,
    value_len: usize,
) -> usize {
    let Some(count) = target.variable_count() else {
        return 0;
    };
    if index >= count || value_len > frame.len() - 7 {
        return status_reply(frame, FC_DEBUG_SET, STATUS_OUT_OF_BOUNDS);
    }
    let value = (value_len > 0).then(|| frame[6..6 + value_len].to_vec());
    if !target.set_trace(index, flag != 0, value.as_deref()) {
        return 0;
    }
    status_reply(frame, FC_DEBUG_SET, STATUS_SUCCESS)
}

fn debug_get(
    target: &dyn DebugTarget,
    tick: u32,
    frame: &mut [u8],
    start: u16,
    end: u16,
) -> usize {
    let Some(count) = target.variable_count() else {
        return 0;
    };
    if start >= count || end >= count || start > end {
        return status_reply(frame, FC_DEBUG_GET, STATUS_OUT_OF_BOUNDS);
    }

    let mut payload = Vec::new();
    let mut last_index = start;
    for index in start..=end {
        let Some(bytes) = target.variable_bytes(index) else {
            return 0;
        };
        if payload.len() + 10 + bytes.len() > frame.len() {
            break;
        }
        payload.extend_from_slice(&bytes);
        last_index = index;
    }

    write_payload_reply(frame, FC_DEBUG_GET, last_index, tick, &payload)
}

fn debug_get_list(
    target: &dyn DebugTarget,
    tick: u32,
    frame: &mut [u8],
    index_count: usize,
) -> usize {
    if index_count > MAX_LIST_INDEXES {
        return status_reply(frame, FC_DEBUG_GET_LIST, STATUS_OUT_OF_MEMORY);
    }
    let Some(count) = target.variable_count() else {
        return 0;
    };

    let mut indexes = Vec::with_capacity(index_count);
    for i in 0..index_count {
        let index = read_u16(frame, 3 + i * 2);
        if index >= count {
            return status_reply(frame, FC_DEBUG_GET_LIST, STATUS_OUT_OF_BOUNDS);
        }
        indexes.push(index);
    }

    let mut payload = Vec::new();
    let mut last_index = 0;
    for index in indexes {
        let Some(bytes) = target.variable_bytes(index) else {
            return 0;
        };
        if payload.len() + 10 + bytes.len() > frame.len() {
            break;
        }
        payload.extend_from_slice(&bytes);
        last_index = index;
    }

    write_payload_reply(frame, FC_DEBUG_GET_LIST, last_index, tick, &payload)
}

fn debug_get_md5(target: &dyn DebugTarget, frame: &mut [u8]) -> usize {
    let order = match u16::from_be_bytes([frame[1], frame[2]]) {
        0xDEAD => ByteOrder::Same,
        0xADDE => ByteOrder::Reversed,
        _ => return status_reply(frame, FC_DEBUG_GET_MD5, STATUS_OUT_OF_BOUNDS),
    };
    if !target.set_endianness(order) {
        return 0;
    }
    let Some(md5) = target.md5() else {
        return 0;
    };
    let bytes = md5.as_bytes();
    if bytes.len() + 3 > frame.len() {
        return 0;
    }
    frame[0] = FC_DEBUG_GET_MD5;
    frame[1] = STATUS_SUCCESS;
    frame[2..2 + bytes.len()].copy_from_slice(bytes);
    frame[2 + bytes.len()] = 0;
    bytes.len() + 3
}

/// Ten-byte success header (`fc`, `0x7E`, last index, tick, payload size)
/// followed by the concatenated value bytes.
fn write_payload_reply(
    frame: &mut [u8],
    fcode: u8,
    last_index: u16,
    tick: u32,
    payload: &[u8],
) -> usize {
    frame[0] = fcode;
    frame[1] = STATUS_SUCCESS;
    frame[2..4].copy_from_slice(&last_index.to_be_bytes());
    frame[4..8].copy_from_slice(&tick.to_be_bytes());
    frame[8..10].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    frame[10..10 + payload.len()].copy_from_slice(payload);
    10 + payload.len()
}

fn status_reply(frame: &mut [u8], fcode: u8, status: u8) -> usize {
    frame[0] = fcode;
    frame[1] = status;
    2
}

fn read_u16(frame: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([frame[offset], frame[offset + 1]])
}
