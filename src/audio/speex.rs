//! Safe wrapper around SpeexDSP's float resampler.

use std::ffi::c_int;

use anyhow::Result;

use super::resample::{BlockFifo, SampleRateConverter};

// ======================== FFI declarations ========================

/// Opaque type for SpeexResamplerState
#[repr(C)]
pub struct SpeexResamplerState {
    _private: [u8; 0],
}

// Resampler constants
const SPEEX_RESAMPLER_QUALITY_VOIP: c_int = 3;
const RESAMPLER_ERR_SUCCESS: c_int = 0;

unsafe extern "C" {
    fn speex_resampler_init(
        nb_channels: u32,
        in_rate: u32,
        out_rate: u32,
        quality: c_int,
        err: *mut c_int,
    ) -> *mut SpeexResamplerState;
    fn speex_resampler_destroy(st: *mut SpeexResamplerState);
    fn speex_resampler_reset_mem(st: *mut SpeexResamplerState) -> c_int;
    fn speex_resampler_skip_zeros(st: *mut SpeexResamplerState) -> c_int;
    fn speex_resampler_process_float(
        st: *mut SpeexResamplerState,
        channel_index: u32,
        in_: *const f32,
        in_len: *mut u32,
        out: *mut f32,
        out_len: *mut u32,
    ) -> c_int;
}

// ======================== Resampler ========================

/// Mono SpeexDSP resampler producing exactly one output block per input block.
///
/// Speex does not promise a fixed number of output samples per call, so the
/// produced samples go through a [`BlockFifo`].
pub struct Resampler {
    state: *mut SpeexResamplerState,
    in_len: usize,
    in_buf: Vec<f32>,
    out_buf: Vec<f32>,
    fifo: BlockFifo,
}

// SpeexResamplerState is used from the audio thread only
unsafe impl Send for Resampler {}

impl Resampler {
    /// Create a new mono resampler.
    ///
    /// * `in_rate`  - Input sample rate
    /// * `out_rate` - Output sample rate
    pub fn new(in_rate: u32, out_rate: u32) -> Result<Self> {
        let mut err: c_int = 0;
        let state = unsafe {
            speex_resampler_init(1, in_rate, out_rate, SPEEX_RESAMPLER_QUALITY_VOIP, &mut err)
        };
        if err != RESAMPLER_ERR_SUCCESS || state.is_null() {
            anyhow::bail!("Failed to initialize speex resampler: err={}", err);
        }
        Ok(Self {
            state,
            in_len: 0,
            in_buf: Vec::new(),
            out_buf: Vec::new(),
            fifo: BlockFifo::default(),
        })
    }
}

impl SampleRateConverter for Resampler {
    fn init(&mut self, in_len: usize, out_len: usize) -> Result<()> {
        if in_len == 0 || out_len == 0 {
            anyhow::bail!("resampler block sizes must be non-zero: in={}, out={}", in_len, out_len);
        }
        self.in_len = in_len;
        self.in_buf = vec![0.0; in_len];
        // headroom for rounding in the fractional ratio
        self.out_buf = vec![0.0; out_len * 2 + 16];
        self.fifo.configure(out_len);
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        unsafe {
            speex_resampler_reset_mem(self.state);
            speex_resampler_skip_zeros(self.state);
        }
        self.fifo.clear();
    }

    fn process(&mut self, input: &[f64], output: &mut [f64]) {
        for (dst, &src) in self.in_buf.iter_mut().zip(input) {
            *dst = src as f32;
        }

        let mut in_len = self.in_len as u32;
        let mut out_len = self.out_buf.len() as u32;
        let err = unsafe {
            speex_resampler_process_float(
                self.state,
                0,
                self.in_buf.as_ptr(),
                &mut in_len,
                self.out_buf.as_mut_ptr(),
                &mut out_len,
            )
        };
        if err != RESAMPLER_ERR_SUCCESS {
            log::warn!("Speex resampler error: {}", err);
            out_len = 0;
        }

        self.fifo
            .push(self.out_buf[..out_len as usize].iter().map(|&s| s as f64));
        self.fifo.pop_block(output);
    }
}

impl Drop for Resampler {
    fn drop(&mut self) {
        unsafe {
            speex_resampler_destroy(self.state);
        }
    }
}
