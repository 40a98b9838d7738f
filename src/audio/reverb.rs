//! Mono reverb for the transmit path.
//!
//! Schroeder/JCRev layout: three all-pass filters in series for diffusion
//! followed by four parallel feedback comb filters. `process_sample` returns
//! the wet signal only; the caller decides how much of it to add.

/// All-pass delay line lengths (in samples at 44.1kHz)
const ALLPASS_LENGTHS: [usize; 3] = [225, 341, 441];

/// Comb filter delay line lengths (in samples at 44.1kHz)
const COMB_LENGTHS: [usize; 4] = [1116, 1356, 1422, 1617];

const ALLPASS_COEFF: f64 = 0.7;

/// Gain compensation for summing the four combs.
const COMB_GAIN: f64 = 0.25;

/// Reverb decay time to -60 dB.
const T60_SECONDS: f64 = 1.1;

fn scaled_len(length: usize, sample_rate: u32) -> usize {
    ((length as f64 * sample_rate as f64 / 44100.0) as usize).max(1)
}

struct DelayLine {
    buffer: Vec<f64>,
    pos: usize,
}

impl DelayLine {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length],
            pos: 0,
        }
    }

    #[inline]
    fn last_out(&self) -> f64 {
        self.buffer[self.pos]
    }

    #[inline]
    fn push(&mut self, value: f64) {
        self.buffer[self.pos] = value;
        self.pos = (self.pos + 1) % self.buffer.len();
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

pub struct Reverb {
    allpass: Vec<DelayLine>,
    combs: Vec<DelayLine>,
    comb_coeffs: Vec<f64>,
}

impl Reverb {
    pub fn new(sample_rate: u32) -> Self {
        let allpass = ALLPASS_LENGTHS
            .iter()
            .map(|&len| DelayLine::new(scaled_len(len, sample_rate)))
            .collect();

        let comb_lens: Vec<usize> = COMB_LENGTHS
            .iter()
            .map(|&len| scaled_len(len, sample_rate))
            .collect();
        let comb_coeffs = comb_lens
            .iter()
            .map(|&len| 10f64.powf(-3.0 * len as f64 / (T60_SECONDS * sample_rate as f64)))
            .collect();
        let combs = comb_lens.into_iter().map(DelayLine::new).collect();

        Self {
            allpass,
            combs,
            comb_coeffs,
        }
    }

    /// Drop all filter memory.
    pub fn clear(&mut self) {
        self.allpass.iter_mut().for_each(DelayLine::clear);
        self.combs.iter_mut().for_each(DelayLine::clear);
    }

    /// Run one sample through the filter network and return the wet output.
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let mut signal = input;
        for ap in &mut self.allpass {
            let delayed = ap.last_out();
            let fed = signal + ALLPASS_COEFF * delayed;
            ap.push(fed);
            signal = delayed - ALLPASS_COEFF * fed;
        }

        let mut wet = 0.0;
        for (comb, &coeff) in self.combs.iter_mut().zip(&self.comb_coeffs) {
            let out = signal + coeff * comb.last_out();
            comb.push(out);
            wet += out;
        }

        wet * COMB_GAIN
    }
}
