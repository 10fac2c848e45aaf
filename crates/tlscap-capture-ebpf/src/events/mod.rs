//! Kernel record layouts for each backend family

mod gotls;
mod ssl_data;

pub use gotls::GoTlsEvent;
pub use ssl_data::SslDataEvent;
