//! Record geometry shared with the kernel-side probe programs
//!
//! These constants mirror the eBPF-side structures and must be kept in sync.

use tlscap_core::events::COMM_LEN;

/// Payload buffer size of the Go TLS record (fixed in the probe program)
pub const GOTLS_DATA_LEN: usize = 4096;

/// Size of a Go TLS record: ts, pid, tid, len, comm, data
pub const GOTLS_RECORD_LEN: usize = 8 + 4 + 4 + 4 + COMM_LEN + GOTLS_DATA_LEN;

/// Default payload buffer size of the OpenSSL/GnuTLS/NSPR record
pub const SSL_DATA_DEFAULT_LEN: usize = 4096;

/// Size of an OpenSSL/GnuTLS/NSPR record for a given payload capacity:
/// type, ts, pid, tid, data, len, comm
pub const fn ssl_data_record_len(capacity: usize) -> usize {
    8 + 8 + 4 + 4 + capacity + 4 + COMM_LEN
}

/// Ring buffer map every probe object exports
pub const EVENTS_MAP: &str = "events";
