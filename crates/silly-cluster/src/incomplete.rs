use crate::error::ClusterError;

/// Size, in bytes, of the fixed portion of a request frame that follows the
/// length prefix: session(4) + cmd(4) + traceid(8).
const REQUEST_HEADER_SIZE: usize = 16;
/// Size, in bytes, of the fixed portion of a response frame: session(4).
const RESPONSE_HEADER_SIZE: usize = 4;
pub(crate) const ACK_BIT: u32 = 1 << 31;

pub(crate) enum FeedStep {
    NeedMore(usize),
    Complete { consumed: usize, body: Vec<u8> },
}

fn validate_psize(psize: u32, hardlimit: u32) -> Result<(), ClusterError> {
    if (psize as usize) < RESPONSE_HEADER_SIZE {
        return Err(ClusterError::PacketTooSmall);
    }
    if psize > hardlimit {
        return Err(ClusterError::HardLimit);
    }
    Ok(())
}

fn validate_payload(body: &[u8]) -> Result<(), ClusterError> {
    let session = u32::from_le_bytes(body[0..4].try_into().unwrap());
    if session & ACK_BIT != 0 {
        return Ok(());
    }
    if body.len() < REQUEST_HEADER_SIZE {
        return Err(ClusterError::PacketTooSmall);
    }
    Ok(())
}

/// Per-fd reassembly state: a 4-byte length prefix followed by `psize` bytes
/// of body, fed in from however many reads it takes to arrive. Mirrors the
/// `incomplete` struct's `hdr_off`/`header`/`rsize`/`buff` fields, minus the
/// intrusive hash-chain pointers -- those are replaced by the owning map key.
pub(crate) struct Incomplete {
    hdr_off: usize,
    header: [u8; 4],
    body: Vec<u8>,
    body_offset: usize,
}

impl Incomplete {
    pub(crate) fn new() -> Self {
        Incomplete { hdr_off: 0, header: [0; 4], body: Vec::new(), body_offset: 0 }
    }

    fn psize(&self) -> u32 {
        u32::from_le_bytes(self.header)
    }

    /// Feeds as much of `data` as is needed to either finish the header, fill
    /// the body, or exhaust `data` -- whichever comes first. Never reads past
    /// a completed frame's boundary, so leftover bytes belong to the next
    /// frame on this fd.
    pub(crate) fn feed(&mut self, data: &[u8], hardlimit: u32) -> Result<FeedStep, ClusterError> {
        let mut eaten = 0;

        if self.hdr_off < 4 {
            let need = 4 - self.hdr_off;
            let copy = need.min(data.len());
            self.header[self.hdr_off..self.hdr_off + copy].copy_from_slice(&data[..copy]);
            self.hdr_off += copy;
            eaten += copy;
        }

        if self.hdr_off == 4 {
            if self.body.is_empty() {
                let psize = self.psize();
                validate_psize(psize, hardlimit)?;
                self.body = vec![0u8; psize as usize];
                self.body_offset = 0;
            }

            let need = self.body.len() - self.body_offset;
            let left = data.len() - eaten;
            let copy = need.min(left);
            self.body[self.body_offset..self.body_offset + copy]
                .copy_from_slice(&data[eaten..eaten + copy]);
            self.body_offset += copy;
            eaten += copy;

            if self.body_offset == self.body.len() {
                validate_payload(&self.body)?;
                let body = std::mem::take(&mut self.body);
                return Ok(FeedStep::Complete { consumed: eaten, body });
            }
        }

        Ok(FeedStep::NeedMore(eaten))
    }
}
