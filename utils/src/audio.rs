use ringbuf::HeapRb;

/// One PCM16 mono frame.
pub const BYTES_PER_FRAME: usize = 2;

/// Root-mean-square level of PCM16 little-endian samples, normalized to `0.0..=1.0`.
///
/// A trailing odd byte is ignored. Empty input is silent.
pub fn rms(pcm16: &[u8]) -> f64 {
    let sample_count = pcm16.len() / BYTES_PER_FRAME;
    if sample_count == 0 {
        return 0.0;
    }
    let sum: i64 = pcm16
        .chunks_exact(BYTES_PER_FRAME)
        .map(|chunk| {
            let sample = i64::from(i16::from_le_bytes([chunk[0], chunk[1]]));
            sample * sample
        })
        .sum();
    (sum as f64 / sample_count as f64).sqrt() / 32768.0
}

/// Averages interleaved channels down to mono.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Interprets PCM16 little-endian bytes as samples in `-1.0..1.0`.
pub fn pcm16_to_f32(pcm16: &[u8]) -> Vec<f32> {
    pcm16
        .chunks_exact(BYTES_PER_FRAME)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// A trait for converting audio sample types to PCM16 little-endian bytes.
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [i16] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
    }
}

impl ToBinary for [f32] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| {
                let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(rms(&[0u8; 2048]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_of_full_scale_square_wave() {
        let samples: Vec<i16> = (0..1024)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        let level = rms(&samples.to_binary());
        assert!((level - 1.0).abs() < 0.01, "rms was {level}");
    }

    #[test]
    fn test_rms_ignores_trailing_byte() {
        let mut pcm = [1000i16, -1000].to_binary();
        let even = rms(&pcm);
        pcm.push(0x7f);
        assert_eq!(rms(&pcm), even);
        assert!((even - 1000.0 / 32768.0).abs() < 1e-9);
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[0.5, 0.25, -0.5, -1.0], 2), vec![0.375, -0.75]);
        assert_eq!(downmix(&[0.5, 0.25], 1), vec![0.5, 0.25]);
    }

    #[test]
    fn test_pcm16_f32_conversion() {
        let pcm = [0i16, 16384, -32768].to_binary();
        assert_eq!(pcm16_to_f32(&pcm), vec![0.0, 0.5, -1.0]);
        assert_eq!([0.0f32, 0.5, -1.0].to_binary(), pcm);
    }
}
