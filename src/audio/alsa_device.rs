//! ALSA duplex sound card: one capture and one playback PCM, stereo S16LE,
//! one period per audio block.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::device::AudioDevice;

/// Every block on the sound card side is stereo.
const CHANNELS: u32 = 2;

/// Periods in the hardware buffer. Two keep the round trip as short as the
/// card allows.
const PERIODS: Frames = 2;

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    }
}

/// Open one direction of the card for blocks of `block_frames` frames at
/// exactly `sample_rate`. Returns the PCM and the period size it got.
///
/// The resamplers are built for one fixed ratio, so a card that only offers
/// a nearby rate or a different channel count is rejected here.
fn open_stream(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    block_frames: usize,
) -> Result<(PCM, usize)> {
    let name = direction_name(direction);
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, name))?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(CHANNELS)
            .with_context(|| format!("{} '{}' has no stereo mode", name, device))?;
        hwp.set_rate(sample_rate, ValueOr::Nearest)
            .with_context(|| format!("{} '{}' does not run at {} Hz", name, device, sample_rate))?;
        hwp.set_period_size_near(block_frames as Frames, ValueOr::Nearest)?;
        hwp.set_buffer_size_near(block_frames as Frames * PERIODS)?;
        pcm.hw_params(&hwp)?;
    }

    let hwp = pcm.hw_params_current()?;
    let (rate, channels) = (hwp.get_rate()?, hwp.get_channels()?);
    if rate != sample_rate || channels != CHANNELS {
        anyhow::bail!(
            "{} '{}' negotiated {} Hz / {} ch, need {} Hz / {} ch",
            name,
            device,
            rate,
            channels,
            sample_rate,
            CHANNELS
        );
    }
    let period = hwp.get_period_size()? as usize;
    let buffer = hwp.get_buffer_size()? as usize;
    drop(hwp);

    log::info!(
        "ALSA {}: device={}, rate={}, period={}, buffer={}",
        name,
        device,
        rate,
        period,
        buffer,
    );
    Ok((pcm, period))
}

/// Capture and playback PCMs driven as one blocking duplex device.
pub struct AlsaDevice {
    capture: PCM,
    playback: PCM,
    block_frames: usize,
}

// Each PCM handle is only ever used from the audio thread that owns the device
unsafe impl Send for AlsaDevice {}

impl AlsaDevice {
    /// Open both directions with `block_frames` stereo frames per period.
    pub fn open(
        capture_device: &str,
        playback_device: &str,
        sample_rate: u32,
        block_frames: usize,
    ) -> Result<Self> {
        let (capture, capture_period) =
            open_stream(capture_device, Direction::Capture, sample_rate, block_frames)?;
        let (playback, playback_period) =
            open_stream(playback_device, Direction::Playback, sample_rate, block_frames)?;

        // a larger period only costs latency, reads and writes still loop per block
        if capture_period != block_frames || playback_period != block_frames {
            log::warn!(
                "period size differs from block size: capture={}, playback={}, block={}",
                capture_period,
                playback_period,
                block_frames
            );
        }

        Ok(Self {
            capture,
            playback,
            block_frames,
        })
    }
}

impl AudioDevice for AlsaDevice {
    fn read(&mut self, buffer: &mut [i16]) -> bool {
        let io = match self.capture.io_i16() {
            Ok(io) => io,
            Err(e) => {
                log::warn!("ALSA capture io error: {}", e);
                return false;
            }
        };

        let channels = CHANNELS as usize;
        let mut frames_read = 0;
        while frames_read < self.block_frames {
            match io.readi(&mut buffer[frames_read * channels..]) {
                Ok(n) => frames_read += n,
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    if let Err(e2) = self.capture.prepare() {
                        log::error!("Failed to recover PCM capture: {}", e2);
                    }
                    // the block is incomplete, hand back what we have
                    return false;
                }
            }
        }
        true
    }

    fn write(&mut self, buffer: &[i16]) -> bool {
        let io = match self.playback.io_i16() {
            Ok(io) => io,
            Err(e) => {
                log::warn!("ALSA playback io error: {}", e);
                return false;
            }
        };

        // Write with retry loop to handle short writes; an XRUN is reported
        // after recovery so the caller can signal it.
        let channels = CHANNELS as usize;
        let mut frames_written = 0;
        let mut ok = true;
        while frames_written < self.block_frames {
            let offset = frames_written * channels;
            match io.writei(&buffer[offset..]) {
                Ok(n) => frames_written += n,
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    if let Err(e2) = self.playback.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return false;
                    }
                    if !ok {
                        // second failure within one block, drop the rest
                        return false;
                    }
                    ok = false;
                }
            }
        }
        ok
    }
}
