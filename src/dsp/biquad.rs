use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Kind of second-order filter a [`Biquad`] realizes. A closed enum: there is
/// no fifth "unknown" state to reject at this layer, that validation happens
/// at the transport boundary before a `FilterKind` ever gets constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Notch,
    Peaking,
}

impl Default for FilterKind {
    fn default() -> Self {
        FilterKind::Peaking
    }
}

/// User-facing filter parameters. Defaults match the spec's "unknown filter"
/// fallback: peaking, 1 kHz, Q 0.707, 0 dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub kind: FilterKind,
    pub center_frequency_hz: f64,
    pub q_factor: f64,
    pub gain_db: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            kind: FilterKind::Peaking,
            center_frequency_hz: 1000.0,
            q_factor: 0.707,
            gain_db: 0.0,
        }
    }
}

impl FilterParams {
    /// `center_frequency_hz` strictly below Nyquist, `q_factor` positive,
    /// `gain_db` finite.
    pub fn is_valid(&self, sample_rate: u32) -> bool {
        self.center_frequency_hz > 0.0
            && self.center_frequency_hz < sample_rate as f64 / 2.0
            && self.q_factor > 0.0
            && self.gain_db.is_finite()
    }
}

/// Normalized (a0 = 1) second-order coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

fn derive(params: &FilterParams, sample_rate: u32) -> Coefficients {
    let fs = sample_rate as f64;
    let fc = params.center_frequency_hz;
    let q = params.q_factor;
    let gain_linear = 10f64.powf(params.gain_db / 20.0);
    let omega0 = 2.0 * PI * fc / fs;
    let sin_omega0 = omega0.sin();
    let cos_omega0 = omega0.cos();
    let alpha = sin_omega0 / (2.0 * q);
    let k = (PI * fc / fs).tan();
    let d = 1.0 + k / q + k * k;

    let (b0, b1, b2, a0, a1, a2) = match params.kind {
        FilterKind::Lowpass => {
            let b0 = (k * k) / d;
            let b1 = 2.0 * b0;
            let b2 = b0;
            let a1 = 2.0 * (k * k - 1.0) / d;
            let a2 = (1.0 - k / q + k * k) / d;
            (b0, b1, b2, 1.0, a1, a2)
        }
        FilterKind::Highpass => {
            let b0 = 1.0 / d;
            let b1 = -2.0 * b0;
            let b2 = b0;
            let a1 = 2.0 * (k * k - 1.0) / d;
            let a2 = (1.0 - k / q + k * k) / d;
            (b0, b1, b2, 1.0, a1, a2)
        }
        FilterKind::Notch => {
            let a0 = 1.0 + alpha;
            (1.0, -2.0 * cos_omega0, 1.0, a0, -2.0 * cos_omega0, 1.0 - alpha)
        }
        FilterKind::Peaking => {
            let a = gain_linear.sqrt();
            let alpha_a = alpha * a;
            let alpha_d = alpha / a;
            let a0 = 1.0 + alpha_d;
            (
                1.0 + alpha_a,
                -2.0 * cos_omega0,
                1.0 - alpha_a,
                a0,
                -2.0 * cos_omega0,
                1.0 - alpha_d,
            )
        }
    };

    Coefficients {
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b2 / a0,
        a1: a1 / a0,
        a2: a2 / a0,
    }
}

/// A stateful second-order IIR filter (Direct Form I), operating sample by
/// sample on signed 16-bit PCM. Delay lines are carried across
/// reconfiguration (`set_params`) — a click on reconfigure is acceptable,
/// per the spec.
#[derive(Debug, Clone)]
pub struct Biquad {
    coeffs: Coefficients,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    pub fn new(params: FilterParams, sample_rate: u32) -> Self {
        Self {
            coeffs: derive(&params, sample_rate),
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Reconfigure in place; the delay line is preserved.
    pub fn set_params(&mut self, params: FilterParams, sample_rate: u32) {
        self.coeffs = derive(&params, sample_rate);
    }

    /// Direct Form I recurrence:
    /// `y = b0*x + b1*x1 + b2*x2 - a1*y1 - a2*y2`, truncated to i16 by
    /// C-style cast semantics (overflow wraps rather than saturates — see
    /// DESIGN.md for why truncation was kept over saturation).
    #[inline]
    pub fn process(&mut self, sample: i16) -> i16 {
        let x = sample as f64;
        let c = &self.coeffs;
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        truncate_i16(y)
    }
}

/// C-style truncating cast from a double-precision sample back to i16:
/// round to the nearest integer, then wrap modulo 2^16 instead of
/// saturating at the rails.
#[inline]
pub fn truncate_i16(y: f64) -> i16 {
    // `f64 as i64` saturates at i64::MIN/MAX (never UB), then the
    // integer-to-integer casts truncate their low bits exactly like a C
    // `(short)` cast would.
    y.round() as i64 as i32 as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peaking_zero_gain_is_identity_on_first_sample() {
        // Invariant 5: a flat peaking filter reproduces the first sample,
        // since the delay line starts at zero.
        let params = FilterParams {
            kind: FilterKind::Peaking,
            center_frequency_hz: 1000.0,
            q_factor: 0.8,
            gain_db: 0.0,
        };
        let mut biquad = Biquad::new(params, 48_000);
        assert_eq!(biquad.process(12_345), 12_345);
        assert_eq!(biquad.process(-500), -500);
    }

    #[test]
    fn truncate_wraps_like_a_c_cast() {
        assert_eq!(truncate_i16(40_000.0), (40_000i32 as i16));
        assert_eq!(truncate_i16(-40_000.0), (-40_000i32 as i16));
        assert_eq!(truncate_i16(100.0), 100);
    }

    #[test]
    fn notch_attenuates_its_center_frequency() {
        let sample_rate = 48_000u32;
        let params = FilterParams {
            kind: FilterKind::Notch,
            center_frequency_hz: 1000.0,
            q_factor: 1.0,
            gain_db: 0.0,
        };
        let mut biquad = Biquad::new(params, sample_rate);

        let n = 2000;
        let amplitude = 10_000.0;
        let mut in_energy = 0.0f64;
        let mut out_energy = 0.0f64;
        for i in 0..n {
            let t = i as f64 / sample_rate as f64;
            let x = (amplitude * (2.0 * PI * 1000.0 * t).sin()).round() as i16;
            let y = biquad.process(x);
            in_energy += (x as f64).powi(2);
            out_energy += (y as f64).powi(2);
        }
        let in_rms = (in_energy / n as f64).sqrt();
        let out_rms = (out_energy / n as f64).sqrt();
        assert!(out_rms <= 0.2 * in_rms, "out_rms={out_rms} in_rms={in_rms}");
    }

    #[test]
    fn reconfigure_preserves_delay_line() {
        let params = FilterParams::default();
        let mut biquad = Biquad::new(params, 48_000);
        biquad.process(1000);
        let x1_before = biquad.x1;
        biquad.set_params(
            FilterParams {
                kind: FilterKind::Lowpass,
                center_frequency_hz: 500.0,
                q_factor: 0.707,
                gain_db: 0.0,
            },
            48_000,
        );
        assert_eq!(biquad.x1, x1_before);
    }
}
