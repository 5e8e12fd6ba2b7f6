//! Streaming sample-rate conversion
//!
//! Browser legs announce an arbitrary capture rate (typically 48kHz) while
//! the recognizer expects a fixed rate. `LinearResampler` converts i16 PCM
//! between rates with linear interpolation, carrying fractional position and
//! the previous sample across chunk boundaries so arbitrarily-sized frames
//! can be fed without clicks at the seams.

/// Stateful linear-interpolation resampler.
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    /// Position of the next output sample, in source-sample units, relative
    /// to the start of the current input chunk. May be -1.0..0.0 when the
    /// next output falls between the previous chunk's last sample and the
    /// current chunk's first.
    pos: f64,
    /// Final sample of the previous chunk.
    last: i16,
}

impl LinearResampler {
    pub fn new(src_rate: u32, dst_rate: u32) -> Self {
        Self {
            src_rate,
            dst_rate,
            pos: 0.0,
            last: 0,
        }
    }

    pub fn src_rate(&self) -> u32 {
        self.src_rate
    }

    /// Convert one chunk of samples. Returns an empty vector for empty input.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.src_rate == self.dst_rate {
            return input.to_vec();
        }

        let step = self.src_rate as f64 / self.dst_rate as f64;
        let n = input.len();
        let mut out =
            Vec::with_capacity((n as f64 / step).ceil() as usize + 1);

        loop {
            let idx = self.pos.floor();
            let i = idx as isize;
            if i + 1 >= n as isize {
                break;
            }
            let frac = self.pos - idx;
            let (a, b) = if i < 0 {
                (self.last, input[0])
            } else {
                (input[i as usize], input[i as usize + 1])
            };
            let value = a as f64 + (b as f64 - a as f64) * frac;
            out.push(value.round() as i16);
            self.pos += step;
        }

        self.pos -= n as f64;
        self.last = input[n - 1];
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_passthrough() {
        let mut r = LinearResampler::new(16000, 16000);
        let input: Vec<i16> = (0..64).collect();
        assert_eq!(r.process(&input), input);
    }

    #[test]
    fn test_downsample_ratio_over_chunks() {
        let mut r = LinearResampler::new(48000, 16000);
        let mut total_out = 0usize;
        let mut total_in = 0usize;
        for _ in 0..100 {
            let chunk = vec![0i16; 480]; // 10ms at 48kHz
            total_in += chunk.len();
            total_out += r.process(&chunk).len();
        }
        let expected = total_in / 3;
        assert!(
            (total_out as i64 - expected as i64).abs() <= 1,
            "expected ~{expected} samples, got {total_out}"
        );
    }

    #[test]
    fn test_upsample_ratio_over_chunks() {
        let mut r = LinearResampler::new(8000, 16000);
        let mut total_out = 0usize;
        for _ in 0..50 {
            total_out += r.process(&vec![0i16; 80]).len();
        }
        let expected = 50 * 80 * 2;
        assert!((total_out as i64 - expected as i64).abs() <= 2);
    }

    #[test]
    fn test_interpolates_between_chunks() {
        // A constant ramp should stay monotonic across a chunk seam.
        let mut r = LinearResampler::new(48000, 16000);
        let first: Vec<i16> = (0..480).collect();
        let second: Vec<i16> = (480..960).collect();
        let mut out = r.process(&first);
        out.extend(r.process(&second));
        for pair in out.windows(2) {
            assert!(pair[1] >= pair[0], "output not monotonic: {pair:?}");
        }
    }

    #[test]
    fn test_empty_input() {
        let mut r = LinearResampler::new(48000, 16000);
        assert!(r.process(&[]).is_empty());
    }
}
