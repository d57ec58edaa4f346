//! Toeplitz-matrix hashing over GF(2).
//!
//! An `m × L` Toeplitz matrix is fixed by a seed of `L + m - 1` bits with
//! `T[i][j] = seed[i - j + L - 1]`. Then `(T·x)[i] = conv(seed, x)[i + L - 1] mod 2`,
//! which is what both multiply paths compute: directly below the FFT threshold and as a
//! transform-domain convolution at or above it.

use rustfft::{FftPlanner, num_complex::Complex};

use crate::bits::BitString;

/// Seed length of an `out_len × in_len` matrix.
pub fn seed_len(in_len: usize, out_len: usize) -> usize {
    (in_len + out_len).saturating_sub(1)
}

/// `T(seed) · input` with `out_len` output bits, choosing the FFT path once `input`
/// reaches `fft_threshold` bits. `None` if the seed length does not match.
pub fn multiply(seed: &BitString, input: &BitString, out_len: usize, fft_threshold: usize) -> Option<BitString> {
    if input.len() >= fft_threshold {
        multiply_fft(seed, input, out_len)
    } else {
        multiply_naive(seed, input, out_len)
    }
}

/// Direct `O(out_len · weight(input))` product.
pub fn multiply_naive(seed: &BitString, input: &BitString, out_len: usize) -> Option<BitString> {
    let l = input.len();
    if out_len == 0 || l == 0 {
        return Some(BitString::zeros(out_len));
    }
    if seed.len() != seed_len(l, out_len) {
        return None;
    }
    let ones: Vec<usize> = (0..l).filter(|&j| input.get(j)).collect();
    let seed = seed.as_slice();
    Some(
        (0..out_len)
            .map(|i| ones.iter().fold(false, |acc, &j| acc ^ seed[i + l - 1 - j]))
            .collect(),
    )
}

/// Transform-domain product: `O((L + m) log(L + m))`.
pub fn multiply_fft(seed: &BitString, input: &BitString, out_len: usize) -> Option<BitString> {
    let l = input.len();
    if out_len == 0 || l == 0 {
        return Some(BitString::zeros(out_len));
    }
    if seed.len() != seed_len(l, out_len) {
        return None;
    }

    let size = (seed.len() + l - 1).next_power_of_two();
    let to_complex = |bits: &BitString| -> Vec<Complex<f64>> {
        let mut buf: Vec<Complex<f64>> = bits
            .iter()
            .map(|b| Complex {
                re: if b { 1.0 } else { 0.0 },
                im: 0.0,
            })
            .collect();
        buf.resize(size, Complex { re: 0.0, im: 0.0 });
        buf
    };
    let mut a = to_complex(seed);
    let mut b = to_complex(input);

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    forward.process(&mut a);
    forward.process(&mut b);
    for (x, y) in a.iter_mut().zip(&b) {
        *x = *x * *y;
    }
    planner.plan_fft_inverse(size).process(&mut a);

    let scale = size as f64;
    Some(
        (0..out_len)
            .map(|i| {
                let count = (a[i + l - 1].re / scale).round() as u64;
                count % 2 == 1
            })
            .collect(),
    )
}
