//! Wire frame for one colour update.
//!
//! ```text
//! AA BB 00 RR GG BB CC DD
//! ```
//!
//! i.e. the big-endian `u64`
//! `0xAA << 56 | 0xBB << 48 | rgb << 16 | 0xCC << 8 | 0xDD`.

use crate::Rgb8;

pub const FRAME_LEN: usize = 8;

const START: [u8; 2] = [0xAA, 0xBB];
const END: [u8; 2] = [0xCC, 0xDD];

/// Packs `r`, `g`, `b` into the low 24 bits as `R<<16 | G<<8 | B`.
pub fn pack_rgb(color: Rgb8) -> u32 {
    u32::from(color.r) << 16 | u32::from(color.g) << 8 | u32::from(color.b)
}

pub fn unpack_rgb(packed: u32) -> Rgb8 {
    Rgb8::new((packed >> 16) as u8, (packed >> 8) as u8, packed as u8)
}

pub fn encode_frame(color: Rgb8) -> [u8; FRAME_LEN] {
    let word = u64::from(START[0]) << 56
        | u64::from(START[1]) << 48
        | u64::from(pack_rgb(color)) << 16
        | u64::from(END[0]) << 8
        | u64::from(END[1]);
    word.to_be_bytes()
}

/// Returns the colour carried by `frame`, or `None` if the markers are wrong.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Option<Rgb8> {
    if frame[..2] != START || frame[6..] != END || frame[2] != 0 {
        return None;
    }
    let word = u64::from_be_bytes(*frame);
    Some(unpack_rgb((word >> 16) as u32 & 0x00FF_FFFF))
}
