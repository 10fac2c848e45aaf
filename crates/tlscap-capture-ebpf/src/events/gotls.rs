//! Go `crypto/tls` record

use crate::types::{GOTLS_DATA_LEN, GOTLS_RECORD_LEN};
use tlscap_core::events::{
    bounded_len, hex_dump, CaptureEvent, Comm, DecodeError, RenderOptions, WireReader, COLOR_BLUE,
    COMM_LEN,
};

/// Plaintext written through a Go TLS connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoTlsEvent {
    module: &'static str,
    pub timestamp_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub comm: Comm,
    /// Valid payload bytes only
    pub payload: Vec<u8>,
}

impl GoTlsEvent {
    /// Decode `ts u64, pid u32, tid u32, len i32, comm [16], data [4096]`
    pub fn decode(module: &'static str, raw: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(raw);
        reader.expect_layout(GOTLS_RECORD_LEN)?;

        let timestamp_ns = reader.u64()?;
        let pid = reader.u32()?;
        let tid = reader.u32()?;
        let len = reader.i32()?;
        let comm = Comm::from_bytes(reader.array::<COMM_LEN>()?);
        let data = reader.bytes(GOTLS_DATA_LEN)?;
        let len = bounded_len(len, GOTLS_DATA_LEN)?;

        Ok(Self {
            module,
            timestamp_ns,
            pid,
            tid,
            comm,
            payload: data[..len].to_vec(),
        })
    }

    fn header(&self) -> String {
        format!("PID: {}, Comm: {}, TID: {}", self.pid, self.comm, self.tid)
    }

    fn ignored(&self, opts: &RenderOptions) -> Option<String> {
        if opts.filter.matches(&self.comm) {
            None
        } else {
            Some(format!(
                "{}, Payload: {}",
                self.header(),
                opts.paint(COLOR_BLUE, "[ignore]")
            ))
        }
    }
}

impl CaptureEvent for GoTlsEvent {
    fn module(&self) -> &'static str {
        self.module
    }

    fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn tid(&self) -> u32 {
        self.tid
    }

    fn comm(&self) -> &Comm {
        &self.comm
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn render(&self, opts: &RenderOptions) -> String {
        if let Some(line) = self.ignored(opts) {
            return line;
        }
        let text = String::from_utf8_lossy(&self.payload);
        format!("{}, Payload: {}", self.header(), text.trim_end_matches('\0'))
    }

    fn render_hex(&self, opts: &RenderOptions) -> String {
        if let Some(line) = self.ignored(opts) {
            return line;
        }
        format!(
            "{}, Payload:\n{}",
            self.header(),
            hex_dump(&self.payload, "")
        )
    }
}
