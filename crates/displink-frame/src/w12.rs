use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::fields::W12Fields;

/// Every W12 frame is exactly this long.
pub const FRAME_LEN: usize = 22;

/// Frame terminator, CR LF.
pub const TERMINATOR: [u8; 2] = *b"\r\n";

const LANGUAGE: usize = 1;
const MESSAGE: usize = 2;
const LEFT_SEMAPHORE: usize = 3;
const RIGHT_SEMAPHORE: usize = 4;
const SIGN: usize = 6;
const WEIGHT: std::ops::Range<usize> = 7..13;
const UNIT: std::ops::Range<usize> = 13..15;
const BARGRAPH_DIRECTION: usize = 16;
const BARGRAPH_VALUE: std::ops::Range<usize> = 17..19;

/// An encoded display update. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct W12Frame([u8; FRAME_LEN]);

impl W12Frame {
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.0)
    }

    /// Language selector decoded from byte 1.
    pub fn language_digit(&self) -> u8 {
        self.0[LANGUAGE].wrapping_sub(b'0')
    }

    /// Message selector decoded from byte 2.
    pub fn message_digit(&self) -> u8 {
        self.0[MESSAGE].wrapping_sub(b'0')
    }

    /// Bargraph direction decoded from byte 16.
    pub fn bargraph_direction_digit(&self) -> u8 {
        self.0[BARGRAPH_DIRECTION].wrapping_sub(b'0')
    }
}

impl AsRef<[u8]> for W12Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Upper-case hex, one space between bytes.
impl fmt::Display for W12Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Build the 22-byte W12 frame for `fields`.
///
/// Wire format (byte offsets, unused positions are ASCII space):
/// ```text
/// ┌───┬──────┬─────┬──────┬──────┬───┬──────┬────────┬──────┬───┬─────┬──────┬───┬───────┐
/// │ 0 │  1   │  2  │  3   │  4   │ 5 │  6   │ 7..=12 │13..14│15 │ 16  │17..18│19 │20..21 │
/// │'0'│ lang │ msg │ left │right │ ␠ │ sign │ weight │ unit │ ␠ │ dir │ bar  │ ␠ │ CR LF │
/// └───┴──────┴─────┴──────┴──────┴───┴──────┴────────┴──────┴───┴─────┴──────┴───┴───────┘
/// ```
///
/// Selectors are ASCII digits. A semaphore byte carries its color in bits
/// 0-1 and the blink flag in bit 7. The weight is right-justified and the
/// unit left-justified, both cut to their width; non-ASCII characters become
/// `?`. The bargraph value is written with two-digit zero padding and only
/// its first two characters are kept.
pub fn build_frame(fields: &W12Fields) -> W12Frame {
    let mut frame = [b' '; FRAME_LEN];
    frame[0] = b'0';
    frame[LANGUAGE] = fields.language.as_digit();
    frame[MESSAGE] = fields.message.as_digit();
    frame[LEFT_SEMAPHORE] = fields.left.to_byte();
    frame[RIGHT_SEMAPHORE] = fields.right.to_byte();
    frame[SIGN] = fields.sign.as_char() as u8;
    put_justified(&mut frame[WEIGHT], &fields.weight, Justify::Right);
    put_justified(&mut frame[UNIT], &fields.unit, Justify::Left);
    frame[BARGRAPH_DIRECTION] = fields.bargraph_direction.as_digit();
    let bargraph = format!("{:02}", fields.bargraph_value);
    frame[BARGRAPH_VALUE].copy_from_slice(&bargraph.as_bytes()[..2]);
    frame[FRAME_LEN - 2..].copy_from_slice(&TERMINATOR);
    W12Frame(frame)
}

/// Append the frame for `fields` to `dst`.
pub fn encode_frame(fields: &W12Fields, dst: &mut BytesMut) {
    dst.reserve(FRAME_LEN);
    dst.put_slice(build_frame(fields).as_bytes());
}

#[derive(Clone, Copy)]
enum Justify {
    Left,
    Right,
}

fn put_justified(dst: &mut [u8], text: &str, justify: Justify) {
    let width = dst.len();
    let padded = match justify {
        Justify::Left => format!("{text:<width$}"),
        Justify::Right => format!("{text:>width$}"),
    };
    for (slot, c) in dst.iter_mut().zip(padded.chars()) {
        *slot = if c.is_ascii() { c as u8 } else { b'?' };
    }
}
