pub mod edata;
pub mod frame;
pub mod smart_electric_energy_meter;

pub use edata::*;
pub use frame::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("too short packet, {0} bytes")]
    TooShort(usize),

    #[error("unsupported EHD {0:02X}{1:02X}")]
    UnsupportedFormat(u8, u8),

    #[error(r#"binary decode "{0}""#)]
    Decode(#[from] bincode::error::DecodeError),

    #[error(r#"binary encode "{0}""#)]
    Encode(#[from] bincode::error::EncodeError),
}

/// Echonetlite電文はビッグエンディアン固定長
pub(crate) fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}
