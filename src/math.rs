pub const FLOAT_EQ_EPSILON: f32 = 0.000001;

pub fn floats_near(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() < epsilon
}

pub fn floats_equal(a: f32, b: f32) -> bool {
    floats_near(a, b, FLOAT_EQ_EPSILON)
}

pub fn round_to_i32(x: f32) -> i32 {
    x.round() as i32
}

/// Amplitude for a fader position in `[0, 1]`. Fader 0.782 is roughly
/// unity gain and fader 0 sits at -infinity dB.
pub fn amp_from_fader(fader: f32) -> f32 {
    2.0_f32.powf((-192.0 + 198.0 * fader.powf(1.0 / 8.0)) / 6.0)
}

/// Inverse of [`amp_from_fader`].
pub fn fader_from_amp(amp: f32) -> f32 {
    if amp <= 0.0 {
        return 0.0;
    }
    ((6.0 * amp.log2() + 192.0) / 198.0).powf(8.0)
}
