//! Blocking sound card interface used by the duplex loop.

/// A full-duplex, interleaved stereo `i16` sound card with a fixed block size.
///
/// Both calls block until one block has been transferred. A `false` return
/// means the transfer was short or failed; for `read` the buffer content is
/// then unspecified and the caller uses it anyway.
pub trait AudioDevice: Send {
    /// Fill `buffer` (one interleaved stereo block) from the capture side.
    fn read(&mut self, buffer: &mut [i16]) -> bool;

    /// Play one interleaved stereo block.
    fn write(&mut self, buffer: &[i16]) -> bool;
}
