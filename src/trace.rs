//! Optional per-block observation of the network streams.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::audio::sample::to_i16;

/// Called once per block from the audio thread with the mono block that was
/// sent and the one that was received. Must be cheap.
pub trait TraceHook: Send {
    fn on_block(&mut self, sent: &[i16], received: &[f64]);
}

/// Dumps `(sent, received)` sample pairs as raw little-endian `i16` to a file,
/// which makes the round trip delay easy to inspect offline.
pub struct RawDumpTrace {
    out: BufWriter<File>,
    failed: bool,
}

impl RawDumpTrace {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create trace dump '{}'", path.display()))?;
        log::info!("Tracing network blocks to {}", path.display());
        Ok(Self {
            out: BufWriter::new(file),
            failed: false,
        })
    }
}

impl TraceHook for RawDumpTrace {
    fn on_block(&mut self, sent: &[i16], received: &[f64]) {
        if self.failed {
            return;
        }
        for (&s, &r) in sent.iter().zip(received) {
            let r = to_i16(r).to_le_bytes();
            let s = s.to_le_bytes();
            if let Err(e) = self.out.write_all(&[s[0], s[1], r[0], r[1]]) {
                log::warn!("Trace dump write failed, disabling: {}", e);
                self.failed = true;
                return;
            }
        }
    }
}

impl Drop for RawDumpTrace {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}
