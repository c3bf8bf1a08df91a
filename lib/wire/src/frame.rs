//! The length-delimited frame codec (C2): splits/joins a byte stream into
//! `start_code(4) | mode(1) | length(4, LE) | payload(length) | end_code(4)` units, and the
//! length-prefixed binary payload layouts carried inside `binary`/`file` frames.
use byteorder::{ByteOrder, LittleEndian};
use flux::error::{Error, Result};

pub const START_CODE: [u8; 4] = *b"FLX\x01";
pub const END_CODE: [u8; 4] = *b"\x01XLF";

/// Tag carried in byte 5 of every frame, selecting how the payload is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    Binary = 1,
    Packet = 2,
    File = 3,
}

impl DataMode {
    pub fn from_byte(b: u8) -> Result<DataMode> {
        match b {
            1 => Ok(DataMode::Binary),
            2 => Ok(DataMode::Packet),
            3 => Ok(DataMode::File),
            other => Err(Error::WireFormat(format!("unknown data mode byte {}", other))),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single decoded wire frame: a data mode tag plus its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub mode: DataMode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(mode: DataMode, payload: Vec<u8>) -> Frame {
        Frame { mode, payload }
    }

    /// Encodes this frame onto the wire: start code, mode byte, LE length, payload, end code.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 1 + 4 + self.payload.len() + 4);
        out.extend_from_slice(&START_CODE);
        out.push(self.mode.as_byte());
        let mut len_buf = [0u8; 4];
        LittleEndian::write_u32(&mut len_buf, self.payload.len() as u32);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&END_CODE);
        out
    }
}

/// The `awaiting_start -> awaiting_mode -> awaiting_length -> awaiting_payload(N) -> awaiting_end`
/// reassembly state machine, fed one chunk of bytes at a time from the socket read loop. Any
/// deviation from the expected start/end code or mode byte fails the session (`FrameState::Failed`
/// is terminal).
pub struct FrameReader {
    state: ReaderState,
    buf: Vec<u8>,
    pending_mode: Option<DataMode>,
}

enum ReaderState {
    AwaitingStart,
    AwaitingMode,
    AwaitingLength,
    AwaitingPayload { mode: DataMode, len: usize },
    AwaitingEnd { mode: DataMode, payload: Vec<u8> },
    Failed,
}

impl Default for FrameReader {
    fn default() -> Self {
        FrameReader::new()
    }
}

impl FrameReader {
    pub fn new() -> FrameReader {
        FrameReader {
            state: ReaderState::AwaitingStart,
            buf: Vec::new(),
            pending_mode: None,
        }
    }

    /// Feeds newly received bytes into the reassembly buffer and drains as many complete frames
    /// as are now available. A session that hits `Failed` must be disconnected by the caller;
    /// further calls after failure return `Err` without consuming `chunk`.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        if matches!(self.state, ReaderState::Failed) {
            return Err(Error::WireFormat("frame reader is in failed state".into()));
        }

        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match &self.state {
                ReaderState::AwaitingStart => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    if self.buf[..4] == START_CODE {
                        self.buf.drain(..4);
                        self.state = ReaderState::AwaitingMode;
                    } else {
                        self.buf.remove(0);
                    }
                }
                ReaderState::AwaitingMode => {
                    if self.buf.is_empty() {
                        break;
                    }
                    let mode = match DataMode::from_byte(self.buf[0]) {
                        Ok(mode) => mode,
                        Err(e) => {
                            self.state = ReaderState::Failed;
                            return Err(e);
                        }
                    };
                    self.buf.remove(0);
                    self.state = ReaderState::AwaitingLength;
                    // re-enter the loop carrying `mode` forward via AwaitingPayload once length
                    // arrives; stash it in a local by looping back through AwaitingLength below.
                    self.pending_mode = Some(mode);
                }
                ReaderState::AwaitingLength => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    let len = LittleEndian::read_u32(&self.buf[..4]) as usize;
                    self.buf.drain(..4);
                    let mode = self.pending_mode.take().expect("mode set before length");
                    self.state = ReaderState::AwaitingPayload { mode, len };
                }
                ReaderState::AwaitingPayload { mode, len } => {
                    if self.buf.len() < *len {
                        break;
                    }
                    let payload = self.buf.drain(..*len).collect();
                    self.state = ReaderState::AwaitingEnd { mode: *mode, payload };
                }
                ReaderState::AwaitingEnd { .. } => {
                    if self.buf.len() < 4 {
                        break;
                    }
                    if self.buf[..4] != END_CODE {
                        self.state = ReaderState::Failed;
                        return Err(Error::WireFormat("end code mismatch".into()));
                    }
                    self.buf.drain(..4);
                    let (mode, payload) = match std::mem::replace(&mut self.state, ReaderState::AwaitingStart) {
                        ReaderState::AwaitingEnd { mode, payload } => (mode, payload),
                        _ => unreachable!(),
                    };
                    frames.push(Frame::new(mode, payload));
                }
                ReaderState::Failed => unreachable!("checked above"),
            }
        }

        Ok(frames)
    }
}

/// The `binary`/`file` payload is a sequence of length-prefixed byte slices (`len:4B LE, bytes`)
/// concatenated back to back; field order is fixed per the message kind carrying it (§6).
pub mod fields {
    use super::*;

    pub fn write_fields(fields: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for field in fields {
            let mut len_buf = [0u8; 4];
            LittleEndian::write_u32(&mut len_buf, field.len() as u32);
            out.extend_from_slice(&len_buf);
            out.extend_from_slice(field);
        }
        out
    }

    /// Splits a binary payload into exactly `count` length-prefixed fields.
    pub fn read_fields(payload: &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(count);
        let mut pos = 0;
        for _ in 0..count {
            if payload.len() < pos + 4 {
                return Err(Error::WireFormat("truncated field length".into()));
            }
            let len = LittleEndian::read_u32(&payload[pos..pos + 4]) as usize;
            pos += 4;
            if payload.len() < pos + len {
                return Err(Error::WireFormat("truncated field payload".into()));
            }
            out.push(payload[pos..pos + len].to_vec());
            pos += len;
        }
        if pos != payload.len() {
            return Err(Error::WireFormat("trailing bytes after fields".into()));
        }
        Ok(out)
    }

    /// `binary` mode: `source_id, source_sub_id, target_id, target_sub_id, data`.
    pub struct BinaryPayload {
        pub source_id: String,
        pub source_sub_id: String,
        pub target_id: String,
        pub target_sub_id: String,
        pub data: Vec<u8>,
    }

    impl BinaryPayload {
        pub fn encode(&self) -> Vec<u8> {
            write_fields(&[
                self.source_id.as_bytes(),
                self.source_sub_id.as_bytes(),
                self.target_id.as_bytes(),
                self.target_sub_id.as_bytes(),
                &self.data,
            ])
        }

        pub fn decode(payload: &[u8]) -> Result<BinaryPayload> {
            let f = read_fields(payload, 5)?;
            Ok(BinaryPayload {
                source_id: utf8(&f[0])?,
                source_sub_id: utf8(&f[1])?,
                target_id: utf8(&f[2])?,
                target_sub_id: utf8(&f[3])?,
                data: f[4].clone(),
            })
        }
    }

    /// `file` upload: `indication_id, source_id, source_sub_id, target_id, target_sub_id,
    /// source_path, target_path, file_bytes`.
    pub struct FileUploadPayload {
        pub indication_id: String,
        pub source_id: String,
        pub source_sub_id: String,
        pub target_id: String,
        pub target_sub_id: String,
        pub source_path: String,
        pub target_path: String,
        pub file_bytes: Vec<u8>,
    }

    impl FileUploadPayload {
        pub fn encode(&self) -> Vec<u8> {
            write_fields(&[
                self.indication_id.as_bytes(),
                self.source_id.as_bytes(),
                self.source_sub_id.as_bytes(),
                self.target_id.as_bytes(),
                self.target_sub_id.as_bytes(),
                self.source_path.as_bytes(),
                self.target_path.as_bytes(),
                &self.file_bytes,
            ])
        }

        pub fn decode(payload: &[u8]) -> Result<FileUploadPayload> {
            let f = read_fields(payload, 8)?;
            Ok(FileUploadPayload {
                indication_id: utf8(&f[0])?,
                source_id: utf8(&f[1])?,
                source_sub_id: utf8(&f[2])?,
                target_id: utf8(&f[3])?,
                target_sub_id: utf8(&f[4])?,
                source_path: utf8(&f[5])?,
                target_path: utf8(&f[6])?,
                file_bytes: f[7].clone(),
            })
        }
    }

    /// `file` notify: `indication_id, target_id, target_sub_id, final_target_path` (an empty path
    /// signals a save failure on the peer that produced this notify).
    pub struct FileNotifyPayload {
        pub indication_id: String,
        pub target_id: String,
        pub target_sub_id: String,
        pub final_target_path: String,
    }

    impl FileNotifyPayload {
        pub fn encode(&self) -> Vec<u8> {
            write_fields(&[
                self.indication_id.as_bytes(),
                self.target_id.as_bytes(),
                self.target_sub_id.as_bytes(),
                self.final_target_path.as_bytes(),
            ])
        }

        pub fn decode(payload: &[u8]) -> Result<FileNotifyPayload> {
            let f = read_fields(payload, 4)?;
            Ok(FileNotifyPayload {
                indication_id: utf8(&f[0])?,
                target_id: utf8(&f[1])?,
                target_sub_id: utf8(&f[2])?,
                final_target_path: utf8(&f[3])?,
            })
        }
    }

    fn utf8(bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::WireFormat(e.to_string()))
    }
}
