//! `Line`: a per-parameter value trajectory from `v0` to `vt` over `end`
//! samples, under a named curve. See SPEC_FULL.md §4.2 / §4.2a.

use serde::{Deserialize, Serialize};

/// Curve shape for a `Line`'s traversal from `v0` to `vt`.
///
/// `Exp` and `Log` are deliberately implemented identically: §4.2 states
/// the same per-direction rule for both ("decay poly when descending,
/// saturating/mirrored when ascending"), so in this implementation they
/// are two script-facing names over one underlying shape — recorded as
/// an Open Question resolution in DESIGN.md.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    /// Constant hold at `v0`.
    Sah,
    /// Affine ramp.
    Lin,
    Exp,
    Log,
}

impl Default for Curve {
    fn default() -> Self {
        Curve::Sah
    }
}

/// Exponential-ish shape polynomial, §4.2a, for `x` in `[0, 1]`.
/// `r(0) == 0`, `r(1) == 1`.
fn shape_r(x: f32) -> f32 {
    let x2 = x * x;
    let x3 = x2 * x;
    x3 + (x2 * x3 - x2) * (x * (629.0 / 1792.0) + x2 * (1163.0 / 1792.0))
}

/// A parameter trajectory. Fields are public so `Generator` and `Event`
/// application can read and overwrite them directly, matching the
/// original's flag-bit semantics with plain Rust fields.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Line {
    pub v0: f32,
    pub vt: f32,
    pub pos: u32,
    pub end: u32,
    pub curve: Curve,
    /// Whether a goal (`v0` -> `vt`) is currently active. Clear means the
    /// Line yields the constant `v0`.
    pub goal: bool,
    /// `v0` is expressed as a ratio of an external multiplier (e.g. a
    /// parent operator's frequency) rather than an absolute value.
    pub state_ratio: bool,
    /// `vt` (the goal) is expressed as a ratio of the external multiplier.
    pub goal_ratio: bool,
}

impl Line {
    /// A Line with no active goal, constantly yielding `v0`.
    pub fn constant(v0: f32) -> Self {
        Line {
            v0,
            vt: v0,
            pos: 0,
            end: 0,
            curve: Curve::Sah,
            goal: false,
            state_ratio: false,
            goal_ratio: false,
        }
    }

    /// The curve's value at elapsed sample `elapsed` (`0..=end`), ignoring
    /// ratio reconciliation and the `goal` flag.
    fn sample_at(&self, elapsed: u32) -> f32 {
        if self.end == 0 {
            return self.vt;
        }
        let x = (elapsed as f32 / self.end as f32).min(1.0);
        match self.curve {
            Curve::Sah => self.v0,
            Curve::Lin => crate::math::lerp(self.v0, self.vt, x),
            Curve::Exp | Curve::Log => {
                if (self.v0 - self.vt).abs() < f32::EPSILON {
                    self.vt
                } else if self.v0 > self.vt {
                    // Descending: dedicated decay polynomial.
                    self.vt + (self.v0 - self.vt) * shape_r(1.0 - x)
                } else {
                    // Ascending: mirrored/saturating shape.
                    self.vt + (self.v0 - self.vt) * (1.0 - shape_r(x))
                }
            }
        }
    }

    /// The Line's current sampled value at its current `pos`, used when
    /// re-aiming a Line mid-ramp (see [`Line::apply_update`]).
    pub fn current_value(&self) -> f32 {
        if self.goal {
            self.sample_at(self.pos)
        } else {
            self.v0
        }
    }

    fn ratio_multiplier(mulbuf: Option<&[f32]>, i: usize) -> f32 {
        mulbuf.and_then(|m| m.get(i).copied()).unwrap_or(1.0)
    }

    /// Fill up to `out.len()` samples of the active ramp starting at the
    /// Line's current `pos`, without advancing `pos`. Returns the number
    /// of samples actually written (`0` if no goal is active).
    pub fn get(&self, out: &mut [f32], mulbuf: Option<&[f32]>) -> usize {
        if !self.goal {
            return 0;
        }
        let remaining = self.end.saturating_sub(self.pos);
        let k = (remaining as usize).min(out.len());
        let both_ratio = self.state_ratio && self.goal_ratio;
        let one_ratio = self.state_ratio != self.goal_ratio;
        for i in 0..k {
            let mut v = self.sample_at(self.pos + i as u32);
            if both_ratio {
                v *= Self::ratio_multiplier(mulbuf, i);
            } else if one_ratio {
                let mul0 = Self::ratio_multiplier(mulbuf, 0);
                if mul0 != 0.0 {
                    if self.state_ratio {
                        v *= mul0;
                    } else {
                        v /= mul0;
                    }
                }
            }
            out[i] = v;
        }
        k
    }

    /// Advance the Line by producing up to `out.len()` samples, collapsing
    /// `v0 <- vt` and clearing the goal once `end` is reached, then
    /// filling the remainder of `out` with the (now constant) `v0`.
    /// Returns whether the goal is still active after the call.
    pub fn run(&mut self, out: &mut [f32], mulbuf: Option<&[f32]>) -> bool {
        let n = out.len();
        let k = self.get(out, mulbuf);
        self.pos += k as u32;
        if self.goal && self.pos >= self.end {
            self.v0 = self.vt;
            self.goal = false;
        }
        // Whatever `get` didn't cover — the whole buffer when no goal was
        // active, or the tail once a ramp collapses mid-buffer — yields
        // the (now settled) constant `v0`.
        if k < n {
            let ratio_active = self.state_ratio || self.goal_ratio;
            for (i, slot) in out.iter_mut().enumerate().skip(k).take(n - k) {
                *slot = if ratio_active {
                    self.v0 * Self::ratio_multiplier(mulbuf, i)
                } else {
                    self.v0
                };
            }
        }
        self.goal
    }

    /// Advance `pos` by `n` samples without producing output, applying the
    /// same terminal collapse as [`Line::run`]. Returns whether the goal
    /// is still active after the call.
    pub fn skip(&mut self, n: u32) -> bool {
        self.pos += n;
        if self.goal && self.pos >= self.end {
            self.v0 = self.vt;
            self.goal = false;
        }
        self.goal
    }
}

/// A partial update to a `Line`, as carried by an `Event` payload. Only
/// the fields present are applied; everything else is preserved.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LineUpdate {
    pub v0: Option<f32>,
    pub vt: Option<f32>,
    pub end: Option<u32>,
    pub curve: Option<Curve>,
    pub state_ratio: Option<bool>,
    pub goal_ratio: Option<bool>,
}

impl Line {
    /// Apply a partial update, following the copy semantics of §4.2: an
    /// incoming retarget that does not also specify a fresh `v0` picks up
    /// the Line's currently sampled value, so re-aiming mid-ramp never
    /// produces a discontinuity.
    pub fn apply_update(&mut self, update: &LineUpdate) {
        let retargets = update.vt.is_some() || update.end.is_some();
        if self.goal && retargets && update.v0.is_none() {
            self.v0 = self.current_value();
        } else if let Some(v0) = update.v0 {
            self.v0 = v0;
        }
        if let Some(vt) = update.vt {
            self.vt = vt;
            self.goal = true;
        }
        if let Some(end) = update.end {
            self.end = end;
            self.pos = 0;
            self.goal = true;
        }
        if let Some(curve) = update.curve {
            self.curve = curve;
        }
        if let Some(sr) = update.state_ratio {
            self.state_ratio = sr;
        }
        if let Some(gr) = update.goal_ratio {
            self.goal_ratio = gr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(v0: f32, vt: f32, end: u32, curve: Curve) -> Line {
        Line {
            v0,
            vt,
            pos: 0,
            end,
            curve,
            goal: true,
            state_ratio: false,
            goal_ratio: false,
        }
    }

    #[test]
    fn no_goal_yields_zero_samples() {
        let line = Line::constant(1.0);
        let mut out = [0.0; 8];
        assert_eq!(line.get(&mut out, None), 0);
    }

    #[test]
    fn no_goal_run_fills_buffer_with_constant() {
        let mut line = Line::constant(2.5);
        let mut out = [0.0f32; 8];
        let goal = line.run(&mut out, None);
        assert!(!goal);
        assert!(out.iter().all(|&v| (v - 2.5).abs() < 1e-6));
    }

    #[test]
    fn linear_ramp_reaches_goal_exactly() {
        let mut line = ramp(0.0, 1.0, 100, Curve::Lin);
        let mut buf = [0.0f32; 25];
        let mut last = 0.0;
        for _ in 0..4 {
            line.run(&mut buf, None);
            last = *buf.last().unwrap();
        }
        assert!(!line.goal);
        assert_eq!(line.v0, line.vt);
        assert!((last - 1.0).abs() <= 1e-6);
    }

    #[test]
    fn exp_ramp_is_monotone_and_reaches_goal_exactly() {
        let mut line = ramp(1.0, 0.0, 1000, Curve::Exp);
        let mut buf = [0.0f32; 100];
        let mut prev = 1.0f32;
        let mut monotone = true;
        for _ in 0..10 {
            line.run(&mut buf, None);
            for &v in buf.iter() {
                if v > prev + 1e-6 {
                    monotone = false;
                }
                prev = v;
            }
        }
        assert!(monotone);
        assert!(!line.goal);
        assert!((prev - 0.0).abs() <= 1e-4);
    }

    #[test]
    fn skip_then_run_matches_run_then_run() {
        let mut a = ramp(0.0, 10.0, 40, Curve::Lin);
        let mut discard = [0.0f32; 10];
        a.run(&mut discard, None);
        let mut tail_a = [0.0f32; 10];
        a.run(&mut tail_a, None);

        let mut b = ramp(0.0, 10.0, 40, Curve::Lin);
        b.skip(10);
        let mut tail_b = [0.0f32; 10];
        b.run(&mut tail_b, None);

        assert_eq!(tail_a, tail_b);
    }

    #[test]
    fn retarget_mid_ramp_picks_up_current_value() {
        let mut line = ramp(0.0, 1.0, 100, Curve::Lin);
        let mut buf = [0.0f32; 50];
        line.run(&mut buf, None);
        let current = line.current_value();
        line.apply_update(&LineUpdate {
            v0: None,
            vt: Some(0.0),
            end: Some(50),
            curve: None,
            state_ratio: None,
            goal_ratio: None,
        });
        assert!((line.v0 - current).abs() < 1e-6);
        assert_eq!(line.pos, 0);
    }
}
