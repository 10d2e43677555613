//! Channel-count conversion for interleaved float PCM.

/// Averages every frame of `input` down to one channel.
pub fn downmix_to_mono(input: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels == 0 {
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        input
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Converts interleaved `input` from `in_channels` to `out_channels`.
///
/// Mono output is the unweighted mean of all input channels. Stereo output
/// duplicates a mono input or keeps the first two channels (front left/right)
/// of a wider one.
pub fn remix(input: &[f32], in_channels: usize, out_channels: usize, out: &mut Vec<f32>) {
    if in_channels == out_channels {
        out.clear();
        out.extend_from_slice(input);
        return;
    }

    if out_channels == 1 {
        downmix_to_mono(input, in_channels, out);
        return;
    }

    out.clear();
    if in_channels == 0 {
        return;
    }
    for frame in input.chunks_exact(in_channels) {
        for ch in 0..out_channels {
            out.push(frame[ch.min(in_channels - 1)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_to_mono_is_mean() {
        let mut out = Vec::new();
        downmix_to_mono(&[1.0, 0.0, 0.5, 0.5, -1.0, 0.25], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, -0.375]);
    }

    #[test]
    fn test_surround_to_mono() {
        let mut out = Vec::new();
        remix(&[0.6, 0.6, 0.6, 0.6, 0.0, 0.0], 6, 1, &mut out);
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mut out = Vec::new();
        remix(&[0.1, -0.2], 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, -0.2, -0.2]);
    }

    #[test]
    fn test_surround_to_stereo_keeps_front_pair() {
        let mut out = Vec::new();
        remix(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 6, 2, &mut out);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_passthrough() {
        let mut out = vec![9.0; 3];
        remix(&[0.5, 0.25], 2, 2, &mut out);
        assert_eq!(out, vec![0.5, 0.25]);
    }
}
