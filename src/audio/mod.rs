//! Audio helpers.

pub mod wav;
