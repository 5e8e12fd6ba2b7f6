//! G.711 mu-law companding
//!
//! Telephony legs carry 8kHz mu-law audio; the recognizer and synthesis
//! pipeline work in 16-bit linear PCM. These routines convert between the
//! two representations at the byte level (PCM is little-endian i16).

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Compress a single 16-bit linear sample to an 8-bit mu-law byte.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0 };
    let mut magnitude = if sample < 0 {
        -(sample as i32)
    } else {
        sample as i32
    };
    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (magnitude & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Expand an 8-bit mu-law byte back to a 16-bit linear sample.
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;

    let mut sample = (((mantissa as i32) << 3) + BIAS) << exponent;
    sample -= BIAS;

    if sign != 0 {
        (-sample) as i16
    } else {
        sample as i16
    }
}

/// Decode a mu-law frame into little-endian 16-bit PCM bytes.
pub fn mulaw_to_pcm16(mulaw: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(mulaw.len() * 2);
    for &b in mulaw {
        pcm.extend_from_slice(&mulaw_to_linear(b).to_le_bytes());
    }
    pcm
}

/// Encode little-endian 16-bit PCM bytes into a mu-law frame.
///
/// A trailing odd byte (half a sample) is dropped.
pub fn pcm16_to_mulaw(pcm: &[u8]) -> Vec<u8> {
    let mut mulaw = Vec::with_capacity(pcm.len() / 2);
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        mulaw.push(linear_to_mulaw(sample));
    }
    mulaw
}

/// Interpret little-endian PCM bytes as i16 samples.
pub fn pcm16_bytes_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Serialize i16 samples as little-endian PCM bytes.
pub fn samples_to_pcm16_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
