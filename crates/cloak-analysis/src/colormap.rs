//! A compact approximation of matplotlib's "inferno" colormap, built from a
//! handful of interpolated control points rather than the full 256-entry
//! lookup table the original implementation ships — close enough for a
//! diagnostic overlay, not meant for colorimetric accuracy.

const STOPS: [(f32, [u8; 3]); 7] = [
    (0.00, [0, 0, 4]),
    (0.17, [40, 11, 84]),
    (0.34, [101, 21, 110]),
    (0.50, [159, 42, 99]),
    (0.67, [212, 72, 66]),
    (0.84, [245, 125, 21]),
    (1.00, [252, 255, 164]),
];

/// Map `v` in `[0, 1]` to an sRGB triple along the inferno ramp.
pub fn inferno(v: f32) -> [u8; 3] {
    let v = v.clamp(0.0, 1.0);
    for pair in STOPS.windows(2) {
        let (t0, c0) = pair[0];
        let (t1, c1) = pair[1];
        if v <= t1 || (t1 - 1.0).abs() < 1e-6 {
            let t = if t1 > t0 { (v - t0) / (t1 - t0) } else { 0.0 };
            let t = t.clamp(0.0, 1.0);
            return [
                lerp(c0[0], c1[0], t),
                lerp(c0[1], c1[1], t),
                lerp(c0[2], c1[2], t),
            ];
        }
    }
    STOPS[STOPS.len() - 1].1
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_match_stops() {
        assert_eq!(inferno(0.0), [0, 0, 4]);
        assert_eq!(inferno(1.0), [252, 255, 164]);
    }

    #[test]
    fn out_of_range_values_clamp() {
        assert_eq!(inferno(-1.0), inferno(0.0));
        assert_eq!(inferno(2.0), inferno(1.0));
    }

    #[test]
    fn midpoint_is_between_endpoints_componentwise() {
        let mid = inferno(0.5);
        assert_eq!(mid, [159, 42, 99]);
    }
}
