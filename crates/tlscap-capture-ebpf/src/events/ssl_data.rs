//! OpenSSL / GnuTLS / NSPR data record
//!
//! All three library families share one kernel layout. The payload buffer
//! sits before the declared length, and its capacity has to match the probe
//! objects in use.

use crate::types::ssl_data_record_len;
use tlscap_core::events::{
    bounded_len, hex_dump, CaptureEvent, Comm, DecodeError, Direction, RenderOptions, WireReader,
    COLOR_BLUE, COMM_LEN,
};

/// Plaintext passed through a TLS library read or write call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslDataEvent {
    module: &'static str,
    /// Raw attach-type discriminant
    pub data_type: i64,
    pub timestamp_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub comm: Comm,
    /// Valid payload bytes only
    pub payload: Vec<u8>,
}

impl SslDataEvent {
    /// Decode `type i64, ts u64, pid u32, tid u32, data [capacity], len i32, comm [16]`
    pub fn decode(module: &'static str, raw: &[u8], capacity: usize) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(raw);
        reader.expect_layout(ssl_data_record_len(capacity))?;

        let data_type = reader.i64()?;
        let timestamp_ns = reader.u64()?;
        let pid = reader.u32()?;
        let tid = reader.u32()?;
        let data = reader.bytes(capacity)?;
        let len = reader.i32()?;
        let comm = Comm::from_bytes(reader.array::<COMM_LEN>()?);
        let len = bounded_len(len, capacity)?;

        Ok(Self {
            module,
            data_type,
            timestamp_ns,
            pid,
            tid,
            comm,
            payload: data[..len].to_vec(),
        })
    }

    fn header(&self, opts: &RenderOptions) -> String {
        let direction = Direction::from_attach_type(self.data_type);
        format!(
            "PID:{}, Comm:{}, TID:{}, TYPE:{}, DataLen:{} bytes",
            self.pid,
            self.comm,
            self.tid,
            opts.paint(direction.color(), &direction.label()),
            self.payload.len()
        )
    }

    fn ignored(&self, opts: &RenderOptions) -> Option<String> {
        if opts.filter.matches(&self.comm) {
            None
        } else {
            Some(format!(
                "{}, Payload:{}",
                self.header(opts),
                opts.paint(COLOR_BLUE, "[ignore]")
            ))
        }
    }
}

impl CaptureEvent for SslDataEvent {
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

    fn direction(&self) -> Option<Direction> {
        Some(Direction::from_attach_type(self.data_type))
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn render(&self, opts: &RenderOptions) -> String {
        if let Some(line) = self.ignored(opts) {
            return line;
        }
        let direction = Direction::from_attach_type(self.data_type);
        let text = String::from_utf8_lossy(&self.payload);
        format!(
            "{}, Payload:\n{}",
            self.header(opts),
            opts.paint(direction.color(), text.trim_end_matches('\0'))
        )
    }

    fn render_hex(&self, opts: &RenderOptions) -> String {
        if let Some(line) = self.ignored(opts) {
            return line;
        }
        format!(
            "{}, Payload:\n{}",
            self.header(opts),
            hex_dump(&self.payload, "")
        )
    }
}
