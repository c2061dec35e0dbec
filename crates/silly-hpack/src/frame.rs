//! HTTP/2 frame builders (RFC 7540 §4, §6). These only ever *build* frames --
//! the connection layer decides how to fragment a header block across
//! HEADERS/CONTINUATION and how many DATA frames a body needs.

pub const FRAME_HDR_SIZE: usize = 9;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum FrameType {
    Data = 0,
    Headers = 1,
    RstStream = 3,
    Settings = 4,
    WindowUpdate = 8,
    Continuation = 9,
}

const FRAME_DATA: u8 = FrameType::Data as u8;
const FRAME_HEADERS: u8 = FrameType::Headers as u8;
const FRAME_RST_STREAM: u8 = FrameType::RstStream as u8;
const FRAME_SETTINGS: u8 = FrameType::Settings as u8;
const FRAME_WINDOW_UPDATE: u8 = FrameType::WindowUpdate as u8;
const FRAME_CONTINUATION: u8 = FrameType::Continuation as u8;

pub const FLAG_END_STREAM: u8 = 0x01;
pub const FLAG_END_HEADERS: u8 = 0x04;

fn write_frame_header(out: &mut Vec<u8>, len: usize, frame_type: u8, flags: u8, stream_id: u32) {
    out.push(((len >> 16) & 0xff) as u8);
    out.push(((len >> 8) & 0xff) as u8);
    out.push((len & 0xff) as u8);
    out.push(frame_type);
    out.push(flags);
    out.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
}

/// Splits `block` across one HEADERS frame and as many CONTINUATION frames
/// as needed to respect `max_frame_size`.
pub fn build_headers(block: &[u8], stream_id: u32, end_stream: bool, max_frame_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len() + FRAME_HDR_SIZE * (block.len() / max_frame_size.max(1) + 1));
    let mut chunks = block.chunks(max_frame_size.max(1));
    let first = chunks.next().unwrap_or(&[]);
    let is_last = block.len() <= max_frame_size;

    let mut flags = if end_stream { FLAG_END_STREAM } else { 0 };
    if is_last {
        flags |= FLAG_END_HEADERS;
    }
    write_frame_header(&mut out, first.len(), FRAME_HEADERS, flags, stream_id);
    out.extend_from_slice(first);

    let remaining: Vec<&[u8]> = chunks.collect();
    for (i, chunk) in remaining.iter().enumerate() {
        let last = i + 1 == remaining.len();
        let flags = if last { FLAG_END_HEADERS } else { 0 };
        write_frame_header(&mut out, chunk.len(), FRAME_CONTINUATION, flags, stream_id);
        out.extend_from_slice(chunk);
    }
    out
}

/// Splits `body` across as many DATA frames as `max_frame_size` requires.
pub fn build_data(body: &[u8], stream_id: u32, end_stream: bool, max_frame_size: usize) -> Vec<u8> {
    let step = max_frame_size.max(1);
    let mut out = Vec::with_capacity(body.len() + FRAME_HDR_SIZE * (body.len() / step + 1));
    if body.is_empty() {
        let flags = if end_stream { FLAG_END_STREAM } else { 0 };
        write_frame_header(&mut out, 0, FRAME_DATA, flags, stream_id);
        return out;
    }
    let chunks: Vec<&[u8]> = body.chunks(step).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        let last = i + 1 == chunks.len();
        let flags = if last && end_stream { FLAG_END_STREAM } else { 0 };
        write_frame_header(&mut out, chunk.len(), FRAME_DATA, flags, stream_id);
        out.extend_from_slice(chunk);
    }
    out
}

/// Builds a SETTINGS frame from `(identifier, value)` pairs. An empty slice
/// is a valid SETTINGS ack payload only when combined with the ack flag,
/// which this builder doesn't set -- callers send an empty-body SETTINGS
/// frame with `flags = 0x1` separately for acks.
pub fn build_settings(params: &[(u16, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HDR_SIZE + params.len() * 6);
    write_frame_header(&mut out, params.len() * 6, FRAME_SETTINGS, 0, 0);
    for &(id, value) in params {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

/// Builds a WINDOW_UPDATE frame for `stream_id`, followed by a matching
/// connection-level (stream 0) update when `stream_id != 0` -- mirrors flow
/// control credit being replenished at both scopes at once.
pub fn build_window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((4 + FRAME_HDR_SIZE) * 2);
    write_frame_header(&mut out, 4, FRAME_WINDOW_UPDATE, 0, stream_id);
    out.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
    if stream_id != 0 {
        write_frame_header(&mut out, 4, FRAME_WINDOW_UPDATE, 0, 0);
        out.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
    }
    out
}

/// Builds an RST_STREAM frame carrying `error_code`.
pub fn build_rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HDR_SIZE + 4);
    write_frame_header(&mut out, 4, FRAME_RST_STREAM, 0, stream_id);
    out.extend_from_slice(&error_code.to_be_bytes());
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn headers_fitting_one_frame_sets_end_headers_immediately() {
        let block = vec![1, 2, 3];
        let frame = build_headers(&block, 1, true, 16384);
        assert_eq!(frame[3], FRAME_HEADERS);
        assert_eq!(frame[4], FLAG_END_STREAM | FLAG_END_HEADERS);
        assert_eq!(&frame[FRAME_HDR_SIZE..], &block[..]);
    }

    #[test]
    fn oversized_headers_spill_into_continuation_frames() {
        let block = vec![0xAB; 10];
        let frame = build_headers(&block, 3, false, 4);
        assert_eq!(frame[4] & FLAG_END_HEADERS, 0);
        let second_type = frame[FRAME_HDR_SIZE + 4 + 3];
        assert_eq!(second_type, FRAME_CONTINUATION);
    }

    #[test]
    fn window_update_on_a_stream_also_credits_the_connection() {
        let frame = build_window_update(5, 100);
        assert_eq!(frame.len(), (4 + FRAME_HDR_SIZE) * 2);
        assert_eq!(&frame[5..9], &5u32.to_be_bytes());
        assert_eq!(&frame[9 + 5..9 + 9], &0u32.to_be_bytes());
    }
}
