//! Frame DSP: gain, one-pole IIR smoothing, soft clip, quantize.
//!
//! Converts an unbounded lazy sequence of float32 PCM samples into a lazy
//! sequence of fixed-width 882-byte frames. The stage order and constants
//! are fixed by the wire contract (see `protocol_constants`) so that given
//! identical input samples, output frames are byte-identical across runs.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol_constants::{DSP_GAIN, DSP_SMOOTHING_ALPHA, FRAME_BYTES, FRAME_SAMPLES};

/// Per-stream DSP state: the one-pole filter's previous output and the
/// partially-filled sample buffer for the frame currently being assembled.
///
/// One `FrameDsp` is owned by exactly one stream and destroyed with it; the
/// filter state never crosses stream boundaries.
pub struct FrameDsp {
    y_prev: f32,
    buffer: Vec<f32>,
}

impl Default for FrameDsp {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDsp {
    /// Creates a fresh DSP stage with filter state initialised to 0.0.
    pub fn new() -> Self {
        Self {
            y_prev: 0.0,
            buffer: Vec::with_capacity(FRAME_SAMPLES),
        }
    }

    /// Applies gain, smoothing, and soft clip to one sample, returning the
    /// conditioned float value (still in `[-1, 1]` after soft clip).
    fn condition_sample(&mut self, x: f32) -> f32 {
        let gained = x * DSP_GAIN;
        let y = DSP_SMOOTHING_ALPHA * gained + (1.0 - DSP_SMOOTHING_ALPHA) * self.y_prev;
        self.y_prev = y;
        soft_clip(y)
    }

    /// Feeds samples through gain -> smoothing -> soft clip -> quantize,
    /// assembling full 882-byte frames as the 441-sample buffer fills.
    /// Returns zero or more complete frames; any remainder stays buffered
    /// for the next call or for `finish`.
    pub fn push_samples(&mut self, samples: impl IntoIterator<Item = f32>) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for x in samples {
            let conditioned = self.condition_sample(x);
            self.buffer.push(conditioned);
            if self.buffer.len() == FRAME_SAMPLES {
                frames.push(assemble_frame(&self.buffer));
                self.buffer.clear();
            }
        }
        frames
    }

    /// Flushes any trailing partial buffer as one final, zero-padded frame.
    /// Returns `None` if no samples are buffered (an exact multiple of 441
    /// samples were already emitted as full frames).
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }
        let frame = assemble_frame(&self.buffer);
        self.buffer.clear();
        Some(frame)
    }
}

/// Soft clip: exponential saturation in place of a hard clip, avoiding the
/// discontinuity a hard clamp would introduce at the boundary.
fn soft_clip(x: f32) -> f32 {
    if x > 1.0 {
        1.0 - (-(x - 1.0)).exp()
    } else if x < -1.0 {
        -1.0 + (-(x.abs() - 1.0)).exp()
    } else {
        x
    }
}

/// Quantizes conditioned float samples to 16-bit LE and zero-pads a partial
/// buffer to a full 882-byte frame.
fn assemble_frame(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(FRAME_BYTES);
    for &s in samples {
        out.put_i16_le(quantize(s));
    }
    for _ in samples.len()..FRAME_SAMPLES {
        out.put_i16_le(0);
    }
    out.freeze()
}

fn quantize(x: f32) -> i16 {
    let scaled = (x * i16::MAX as f32).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_constants::FRAME_BYTES;

    #[test]
    fn silence_produces_silent_frame() {
        let mut dsp = FrameDsp::new();
        let frames = dsp.push_samples(vec![0.0f32; FRAME_SAMPLES]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_BYTES);
        assert!(frames[0].iter().all(|&b| b == 0));
    }

    #[test]
    fn exact_multiple_of_frame_size_needs_no_finish() {
        let mut dsp = FrameDsp::new();
        let frames = dsp.push_samples(vec![0.1f32; FRAME_SAMPLES * 2]);
        assert_eq!(frames.len(), 2);
        assert!(dsp.finish().is_none());
    }

    #[test]
    fn trailing_partial_frame_is_zero_padded() {
        let mut dsp = FrameDsp::new();
        let frames = dsp.push_samples(vec![0.1f32; 100]);
        assert!(frames.is_empty());
        let last = dsp.finish().expect("partial buffer should flush");
        assert_eq!(last.len(), FRAME_BYTES);
        // Bytes 200.. (100 samples * 2 bytes) are the zero-padded tail.
        assert!(last[200..].iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_sample_stream_produces_zero_frames() {
        let mut dsp = FrameDsp::new();
        let frames = dsp.push_samples(Vec::<f32>::new());
        assert!(frames.is_empty());
        assert!(dsp.finish().is_none());
    }

    #[test]
    fn deterministic_across_runs() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();

        let mut dsp_a = FrameDsp::new();
        let mut frames_a = dsp_a.push_samples(samples.clone());
        frames_a.extend(dsp_a.finish());

        let mut dsp_b = FrameDsp::new();
        let mut frames_b = dsp_b.push_samples(samples);
        frames_b.extend(dsp_b.finish());

        assert_eq!(frames_a, frames_b);
    }

    #[test]
    fn soft_clip_saturates_without_hard_cutoff() {
        assert!((soft_clip(0.5) - 0.5).abs() < 1e-6);
        assert!(soft_clip(2.0) < 1.0);
        assert!(soft_clip(-2.0) > -1.0);
    }

    #[test]
    fn iir_converges_toward_gained_constant_input() {
        let mut dsp = FrameDsp::new();
        // Below the soft-clip threshold after gain: 0.3 * 1.8 = 0.54.
        let target = 0.3 * DSP_GAIN;
        for _ in 0..200 {
            dsp.condition_sample(0.3);
        }
        assert!((dsp.y_prev - target).abs() < 1e-3);
    }
}
