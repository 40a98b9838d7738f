//! Fixed-ratio block resampling between the device and network rates.
//!
//! Each channel and direction gets its own converter: the filter history of
//! one block is needed to produce the start of the next one, so a converter
//! must never be shared between channels.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use rubato::{FftFixedIn, Resampler};

/// A stateful, fixed-ratio, fixed-block-size resampler for one channel.
pub trait SampleRateConverter: Send {
    /// Configure the converter for `in_len` input samples producing
    /// `out_len` output samples per call and clear all history.
    fn init(&mut self, in_len: usize, out_len: usize) -> Result<()>;

    /// Clear the filter history, keeping the block geometry.
    fn reset(&mut self);

    /// Convert one block. `input` must hold `in_len` samples and `output`
    /// `out_len` samples.
    fn process(&mut self, input: &[f64], output: &mut [f64]);
}

/// Turns a filter's uneven output into exactly one block per call.
///
/// While the filter is still filling up the block is padded with leading
/// zeros; the FIFO never holds more than two blocks.
#[derive(Debug, Default)]
pub(super) struct BlockFifo {
    samples: VecDeque<f64>,
    block: usize,
}

impl BlockFifo {
    pub(super) fn configure(&mut self, block: usize) {
        self.block = block;
        self.samples = VecDeque::with_capacity(block * 3);
    }

    pub(super) fn clear(&mut self) {
        self.samples.clear();
    }

    pub(super) fn push(&mut self, produced: impl IntoIterator<Item = f64>) {
        self.samples.extend(produced);
        while self.samples.len() > self.block * 2 {
            self.samples.pop_front();
        }
    }

    pub(super) fn pop_block(&mut self, output: &mut [f64]) {
        let missing = output.len().saturating_sub(self.samples.len());
        for (i, out) in output.iter_mut().enumerate() {
            *out = if i < missing {
                0.0
            } else {
                self.samples.pop_front().unwrap_or(0.0)
            };
        }
    }
}

/// Band-limited FFT resampler (rubato) for one channel.
pub struct FftResampler {
    in_rate: usize,
    out_rate: usize,
    inner: Option<FftFixedIn<f64>>,
    produced: Vec<Vec<f64>>,
    fifo: BlockFifo,
}

impl FftResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        Self {
            in_rate: in_rate as usize,
            out_rate: out_rate as usize,
            inner: None,
            produced: Vec::new(),
            fifo: BlockFifo::default(),
        }
    }
}

impl SampleRateConverter for FftResampler {
    fn init(&mut self, in_len: usize, out_len: usize) -> Result<()> {
        check_block_sizes(in_len, out_len)?;
        // one channel, the whole block as a single FFT chunk
        let inner = FftFixedIn::<f64>::new(self.in_rate, self.out_rate, in_len, 1, 1)
            .with_context(|| {
                format!(
                    "Failed to create resampler {}Hz -> {}Hz",
                    self.in_rate, self.out_rate
                )
            })?;
        self.produced = inner.output_buffer_allocate(true);
        self.inner = Some(inner);
        self.fifo.configure(out_len);
        Ok(())
    }

    fn reset(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
        self.fifo.clear();
    }

    fn process(&mut self, input: &[f64], output: &mut [f64]) {
        let Some(inner) = self.inner.as_mut() else {
            output.fill(0.0);
            return;
        };
        let wave_in = [input];
        match inner.process_into_buffer(&wave_in[..], self.produced.as_mut_slice(), None) {
            Ok((_, written)) => self.fifo.push(self.produced[0][..written].iter().copied()),
            Err(e) => log::warn!("Resampler error: {}", e),
        }
        self.fifo.pop_block(output);
    }
}

/// Equal rates: copy the block through untouched.
#[derive(Debug, Default)]
pub struct PassThrough;

impl SampleRateConverter for PassThrough {
    fn init(&mut self, in_len: usize, out_len: usize) -> Result<()> {
        check_block_sizes(in_len, out_len)?;
        if in_len != out_len {
            anyhow::bail!("pass-through needs equal block sizes: in={}, out={}", in_len, out_len);
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn process(&mut self, input: &[f64], output: &mut [f64]) {
        output.copy_from_slice(input);
    }
}

fn check_block_sizes(in_len: usize, out_len: usize) -> Result<()> {
    if in_len == 0 || out_len == 0 {
        anyhow::bail!("resampler block sizes must be non-zero: in={}, out={}", in_len, out_len);
    }
    Ok(())
}

/// Which implementation backs the block resamplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    Fft,
    #[cfg(feature = "speexdsp")]
    Speex,
}

impl ConverterKind {
    /// The best converter compiled into this build.
    pub fn preferred() -> Self {
        #[cfg(feature = "speexdsp")]
        {
            ConverterKind::Speex
        }
        #[cfg(not(feature = "speexdsp"))]
        {
            ConverterKind::Fft
        }
    }
}

/// Factory function: create an initialised converter for one channel.
pub fn create_converter(
    kind: ConverterKind,
    in_rate: u32,
    out_rate: u32,
    in_len: usize,
    out_len: usize,
) -> Result<Box<dyn SampleRateConverter>> {
    let mut converter: Box<dyn SampleRateConverter> = if in_rate == out_rate {
        Box::new(PassThrough)
    } else {
        match kind {
            ConverterKind::Fft => Box::new(FftResampler::new(in_rate, out_rate)),
            #[cfg(feature = "speexdsp")]
            ConverterKind::Speex => Box::new(super::speex::Resampler::new(in_rate, out_rate)?),
        }
    };
    converter.init(in_len, out_len)?;
    Ok(converter)
}
