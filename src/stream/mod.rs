/**
 * Streamed response decoding
 *
 * `decoder` frames `data:` segments out of a growing body; `events` drives a
 * transport byte stream through it.
 */
mod decoder;
mod events;

pub use decoder::*;
pub use events::*;
