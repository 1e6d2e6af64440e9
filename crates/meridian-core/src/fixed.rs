use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Used for every dimensionless factor that feeds the simulation (wind
/// strength, luminosity, warm-up progress, conversion ratios) so that
/// repeated ticks never drift.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Energy quantities are integer joules per tick.
pub type Energy = i64;

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Scale an integer energy by a fixed-point factor, rounding toward zero.
///
/// Computed in 128-bit so that large ratings (well past the 32-bit integer
/// range of [`Fixed64`]) never overflow.
#[inline]
pub fn scale_energy(energy: Energy, factor: Fixed64) -> Energy {
    let wide = (energy as i128) * (factor.to_bits() as i128);
    let scaled = wide / (1i128 << 32);
    scaled.clamp(i64::MIN as i128, i64::MAX as i128) as Energy
}

/// Clamp a fixed-point value into `[0, 1]`.
#[inline]
pub fn clamp_unit(v: Fixed64) -> Fixed64 {
    v.clamp(Fixed64::ZERO, Fixed64::ONE)
}

/// Divide two energies into a ratio clamped to `[0, 1]`.
///
/// Returns `None` when the denominator is not positive so callers decide the
/// convention for empty networks.
#[inline]
pub fn unit_ratio(numerator: Energy, denominator: Energy) -> Option<f64> {
    if denominator <= 0 {
        return None;
    }
    let ratio = numerator as f64 / denominator as f64;
    Some(ratio.clamp(0.0, 1.0))
}

/// Exact fixed-point `numerator / denominator`, clamped to `[0, 1]`.
///
/// Returns `None` when the denominator is not positive.
#[inline]
pub fn unit_ratio_fixed(numerator: Energy, denominator: Energy) -> Option<Fixed64> {
    if denominator <= 0 {
        return None;
    }
    let num = (numerator.max(0) as i128).min(denominator as i128);
    let bits = (num << 32) / denominator as i128;
    Some(Fixed64::from_bits(bits as i64))
}

/// Smallest energy `e` such that `scale_energy(e, factor) >= target`.
///
/// Returns `None` for a non-positive factor.
#[inline]
pub fn unscale_energy_ceil(target: Energy, factor: Fixed64) -> Option<Energy> {
    let bits = factor.to_bits() as i128;
    if bits <= 0 {
        return None;
    }
    if target <= 0 {
        return Some(0);
    }
    let wide = ((target as i128) << 32) + bits - 1;
    Some((wide / bits).min(i64::MAX as i128) as Energy)
}
