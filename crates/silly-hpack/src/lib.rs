mod codec;
mod dynamic_table;
mod error;
mod frame;
mod huffman;
mod static_table;
mod varint;

pub use codec::Hpack;
pub use error::HpackError;
pub use frame::{build_data, build_headers, build_rst_stream, build_settings, build_window_update, FRAME_HDR_SIZE};
