//! Band-unlimited wave lookup tables and interpolated sample access.
//!
//! Tables are built once, process-wide, and shared read-only by every
//! `Generator`. Building is idempotent: calling [`init`] any number of
//! times before or after a `Generator` exists always yields the same
//! tables, because the tables are computed deterministically from the
//! wave type alone and cached behind a [`once_cell::sync::OnceCell`].

use crate::math::hermite4;
use once_cell::sync::OnceCell;

/// Table length in samples. The top `log2(LEN)` bits of a 32-bit phase
/// select a table entry; the remaining bits drive interpolation.
pub const LEN: usize = 2048;
const LEN_LOG2: u32 = 11; // 2^11 == LEN

/// The fixed, named set of oscillator waveforms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Wave {
    Sin,
    Tri,
    /// "Saturated rising sine": a sine shaped towards a rounded pulse,
    /// rising faster than it falls. Exact curve is this crate's choice
    /// where the source's naming left the shape unspecified (DESIGN.md).
    Srs,
    Sqr,
    Saw,
}

impl Wave {
    /// All wave types, in a stable order used to size the table store.
    const ALL: [Wave; 5] = [Wave::Sin, Wave::Tri, Wave::Srs, Wave::Sqr, Wave::Saw];

    fn index(self) -> usize {
        match self {
            Wave::Sin => 0,
            Wave::Tri => 1,
            Wave::Srs => 2,
            Wave::Sqr => 3,
            Wave::Saw => 4,
        }
    }
}

type Lut = [f32; LEN];

struct Tables {
    direct: Vec<Lut>,
    integrated: Vec<Lut>,
}

fn build_direct(wave: Wave) -> Lut {
    let mut table = [0.0f32; LEN];
    for (i, slot) in table.iter_mut().enumerate() {
        let phase = i as f32 / LEN as f32; // 0..1
        *slot = match wave {
            Wave::Sin => (std::f32::consts::TAU * phase).sin(),
            Wave::Tri => {
                // 0 -> 1 -> -1 -> 0 triangle, starting at zero.
                let p = (phase + 0.25).fract();
                if p < 0.5 {
                    4.0 * p - 1.0
                } else {
                    3.0 - 4.0 * p
                }
            }
            Wave::Srs => {
                let s = (std::f32::consts::TAU * phase).sin();
                s.signum() * s.abs().powf(0.5)
            }
            Wave::Sqr => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Wave::Saw => 2.0 * phase - 1.0,
        };
    }
    table
}

/// Integrate a direct LUT into a running-sum table, DC-removed and
/// normalized, used to synthesize a differentiated (anti-aliased) output
/// variant. See SPEC_FULL.md / §9 open question on the PILUT variant.
fn build_integrated(direct: &Lut) -> Lut {
    let mut acc = 0.0f64;
    let mut raw = [0.0f64; LEN];
    for (i, slot) in raw.iter_mut().enumerate() {
        acc += direct[i] as f64;
        *slot = acc;
    }
    let mean = raw.iter().sum::<f64>() / LEN as f64;
    let mut peak = 0.0f64;
    for v in raw.iter_mut() {
        *v -= mean;
        peak = peak.max(v.abs());
    }
    let scale = if peak > 0.0 { 1.0 / peak } else { 1.0 };
    let mut table = [0.0f32; LEN];
    for (slot, v) in table.iter_mut().zip(raw.iter()) {
        *slot = (*v * scale) as f32;
    }
    table
}

static TABLES: OnceCell<Tables> = OnceCell::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(|| {
        let direct: Vec<Lut> = Wave::ALL.iter().map(|&w| build_direct(w)).collect();
        let integrated: Vec<Lut> = direct.iter().map(build_integrated).collect();
        Tables { direct, integrated }
    })
}

/// Build (or reuse) the process-wide wave tables. Safe to call repeatedly,
/// including before any `Generator` is constructed.
pub fn init() {
    tables();
}

/// The direct lookup table for `wave`.
pub fn lut(wave: Wave) -> &'static Lut {
    &tables().direct[wave.index()]
}

/// The pre-integrated lookup table for `wave` (differentiated output path).
pub fn pilut(wave: Wave) -> &'static Lut {
    &tables().integrated[wave.index()]
}

/// Linear interpolation into `table` at 32-bit phase `phase32`.
#[inline]
pub fn get_lerp(table: &Lut, phase32: u32) -> f32 {
    let index_bits = 32 - LEN_LOG2;
    let i = (phase32 >> index_bits) as usize;
    let frac_bits = phase32 & ((1u32 << index_bits) - 1);
    let frac = frac_bits as f32 / (1u64 << index_bits) as f32;
    let a = table[i];
    let b = table[(i + 1) % LEN];
    a + (b - a) * frac
}

/// 4-point Hermite interpolation into `table` at 32-bit phase `phase32`.
#[inline]
pub fn get_herp(table: &Lut, phase32: u32) -> f32 {
    let index_bits = 32 - LEN_LOG2;
    let i = (phase32 >> index_bits) as usize;
    let frac_bits = phase32 & ((1u32 << index_bits) - 1);
    let frac = frac_bits as f32 / (1u64 << index_bits) as f32;
    let s0 = table[(i + LEN - 1) % LEN];
    let s1 = table[i];
    let s2 = table[(i + 1) % LEN];
    let s3 = table[(i + 2) % LEN];
    hermite4(s0, s1, s2, s3, frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        let a = lut(Wave::Sin).to_vec();
        init();
        let b = lut(Wave::Sin).to_vec();
        assert_eq!(a, b);
    }

    #[test]
    fn sine_lut_starts_at_zero_and_peaks_at_quarter() {
        let table = lut(Wave::Sin);
        assert!(table[0].abs() < 1e-3);
        assert!((table[LEN / 4] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn lerp_matches_table_at_exact_indices() {
        let table = lut(Wave::Saw);
        let phase = (100u32) << (32 - LEN_LOG2);
        assert!((get_lerp(table, phase) - table[100]).abs() < 1e-6);
    }

    #[test]
    fn square_wave_range_is_bounded() {
        let table = lut(Wave::Sqr);
        for &v in table.iter() {
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}
