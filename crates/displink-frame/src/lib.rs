//! W12 display-update frames.
//!
//! A W12 frame is a fixed 22-byte command telling the panel what to show:
//! - language and message selectors
//! - two semaphores (color + blink)
//! - a signed six-character weight with a two-character unit
//! - a bargraph direction and value
//!
//! Encoding is pure and infallible; [`FieldError`] only comes from
//! converting raw selectors into the typed fields.

pub mod error;
pub mod fields;
pub mod w12;

pub use error::{FieldError, Result};
pub use fields::{
    BargraphDirection, Language, Message, Semaphore, SemaphoreColor, W12Fields, WeightSign,
};
pub use w12::{build_frame, encode_frame, W12Frame, FRAME_LEN, TERMINATOR};
