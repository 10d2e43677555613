//! Sample-rate conversion.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::AudioError;
use crate::AudioResult;

/// Converts interleaved float PCM between two fixed rates.
///
/// The underlying sinc resampler works on fixed input blocks, so input is
/// buffered until a block is complete. Each call returns at most
/// `ceil(frames * ratio)` frames; anything the resampler produced beyond that
/// is carried into the next call.
pub struct RateConverter {
    resampler: SincFixedIn<f32>,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
    pending_in: Vec<Vec<f32>>,
    pending_out: Vec<Vec<f32>>,
}

impl RateConverter {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> AudioResult<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(AudioError::Resampler(format!(
                "invalid conversion {input_rate} Hz -> {output_rate} Hz with {channels} channels"
            )));
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        // 10 ms blocks.
        let block = (input_rate as usize / 100).max(64);
        let resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, block, channels)
            .map_err(|e| AudioError::Resampler(e.to_string()))?;

        debug!(input_rate, output_rate, channels, block, "Created rate converter");

        Ok(Self {
            resampler,
            channels,
            input_rate,
            output_rate,
            pending_in: vec![Vec::with_capacity(block * 2); channels],
            pending_out: vec![Vec::new(); channels],
        })
    }

    /// Output frames per input frame.
    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Upper bound on the frames returned for `frames` input frames.
    pub fn expected_output_frames(&self, frames: usize) -> usize {
        let (input, output) = (self.input_rate as u64, self.output_rate as u64);
        ((frames as u64 * output).div_ceil(input)) as usize
    }

    /// Feeds `frames` interleaved frames and writes the converted frames to `out`.
    /// Returns the number of frames written.
    pub fn process(&mut self, input: &[f32], frames: usize, out: &mut Vec<f32>) -> AudioResult<usize> {
        let channels = self.channels;
        for frame in input.chunks_exact(channels).take(frames) {
            for (pending, &sample) in self.pending_in.iter_mut().zip(frame) {
                pending.push(sample);
            }
        }

        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending_in[0].len() < needed {
                break;
            }

            let block: Vec<&[f32]> = self.pending_in.iter().map(|c| &c[..needed]).collect();
            let produced = self
                .resampler
                .process(&block, None)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;

            for (pending, samples) in self.pending_out.iter_mut().zip(produced) {
                pending.extend(samples);
            }
            for pending in &mut self.pending_in {
                pending.drain(..needed);
            }
        }

        let take = self.pending_out[0]
            .len()
            .min(self.expected_output_frames(frames));

        out.clear();
        out.reserve(take * channels);
        for i in 0..take {
            for pending in &self.pending_out {
                out.push(pending[i]);
            }
        }
        for pending in &mut self.pending_out {
            pending.drain(..take);
        }

        Ok(take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, channels: usize, rate: f64, offset: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let t = (offset + i) as f64 / rate;
                let v = (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32 * 0.5;
                std::iter::repeat(v).take(channels)
            })
            .collect()
    }

    #[test]
    fn test_downsample_frame_bound() {
        let mut converter = RateConverter::new(48_000, 16_000, 2).unwrap();
        let mut out = Vec::new();
        let mut total = 0;

        for packet in 0..100 {
            let input = sine(480, 2, 48_000.0, packet * 480);
            let produced = converter.process(&input, 480, &mut out).unwrap();
            assert!(produced <= 160, "packet {packet} produced {produced}");
            assert_eq!(out.len(), produced * 2);
            total += produced;
        }

        // One second of input is about one second of output.
        assert!(total >= 14_400, "total {total}");
        assert!(total <= 16_000);
    }

    #[test]
    fn test_upsample_irregular_packets() {
        let mut converter = RateConverter::new(44_100, 48_000, 1).unwrap();
        let mut out = Vec::new();
        let mut total_in = 0;
        let mut total_out = 0;

        for packet in 0..200 {
            let frames = [441, 100, 7, 1024][packet % 4];
            let input = sine(frames, 1, 44_100.0, total_in);
            let produced = converter.process(&input, frames, &mut out).unwrap();
            assert!(produced <= converter.expected_output_frames(frames));
            total_in += frames;
            total_out += produced;
        }

        let expected = total_in as f64 * 48_000.0 / 44_100.0;
        assert!(total_out as f64 >= expected * 0.95, "{total_out} < {expected}");
    }

    #[test]
    fn test_preserves_signal_level() {
        let mut converter = RateConverter::new(48_000, 16_000, 1).unwrap();
        let mut out = Vec::new();
        let mut collected = Vec::new();
        for packet in 0..50 {
            let input = sine(480, 1, 48_000.0, packet * 480);
            converter.process(&input, 480, &mut out).unwrap();
            collected.extend_from_slice(&out);
        }

        // Skip the filter warm-up, then compare RMS with the 0.5-amplitude input.
        let steady = &collected[collected.len() / 2..];
        let rms = (steady.iter().map(|s| s * s).sum::<f32>() / steady.len() as f32).sqrt();
        assert!((rms - 0.5 / 2f32.sqrt()).abs() < 0.03, "rms {rms}");
    }

    #[test]
    fn test_expected_output_frames_rounds_up() {
        let converter = RateConverter::new(44_100, 48_000, 2).unwrap();
        assert_eq!(converter.expected_output_frames(441), 480);
        assert_eq!(converter.expected_output_frames(7), 8);
        assert!(RateConverter::new(0, 48_000, 2).is_err());
    }
}
