//! Serial-number arithmetic (RFC 1982) for 32-bit TSNs and 16-bit stream
//! sequence numbers. Raw integer comparison on these values is wrong once
//! they wrap, so every ordering decision in this crate goes through one of
//! these functions.

/// `a < b` in the 32-bit serial-number space.
pub fn sna32lt(a: u32, b: u32) -> bool {
    (a != b) && (a.wrapping_sub(b) > (1 << 31))
}

/// `a <= b` in the 32-bit serial-number space.
pub fn sna32lte(a: u32, b: u32) -> bool {
    a == b || sna32lt(a, b)
}

/// `a > b` in the 32-bit serial-number space.
pub fn sna32gt(a: u32, b: u32) -> bool {
    (a != b) && (b.wrapping_sub(a) > (1 << 31))
}

/// `a >= b` in the 32-bit serial-number space.
pub fn sna32gte(a: u32, b: u32) -> bool {
    a == b || sna32gt(a, b)
}

pub fn sna32eq(a: u32, b: u32) -> bool {
    a == b
}

/// True iff `b` is strictly newer than `a`: `0 < (b - a) mod 2^32 < 2^31`.
pub fn sna32_is_newer(a: u32, b: u32) -> bool {
    sna32lt(a, b)
}

/// `a == b || sna32_is_newer(a, b)`.
pub fn sna32_is_newer_or_equal(a: u32, b: u32) -> bool {
    sna32lte(a, b)
}

/// The shorter arc between `a` and `b` on the 32-bit ring.
pub fn sna32_distance(a: u32, b: u32) -> u32 {
    let d1 = b.wrapping_sub(a);
    let d2 = a.wrapping_sub(b);
    d1.min(d2)
}

/// `a < b` in the 16-bit serial-number space.
pub fn sna16lt(a: u16, b: u16) -> bool {
    (a != b) && (a.wrapping_sub(b) > (1 << 15))
}

/// `a <= b` in the 16-bit serial-number space.
pub fn sna16lte(a: u16, b: u16) -> bool {
    a == b || sna16lt(a, b)
}

/// `a > b` in the 16-bit serial-number space.
pub fn sna16gt(a: u16, b: u16) -> bool {
    (a != b) && (b.wrapping_sub(a) > (1 << 15))
}

/// `a >= b` in the 16-bit serial-number space.
pub fn sna16gte(a: u16, b: u16) -> bool {
    a == b || sna16gt(a, b)
}

pub fn sna16eq(a: u16, b: u16) -> bool {
    a == b
}

#[cfg(test)]
mod test {
    use super::*;

    // Mirrors the interval sweep used to validate the 32-bit teacher
    // implementation: walk a window around every power-of-two boundary and
    // check the predicates agree with plain subtraction semantics.
    const DIV: u32 = 16;

    #[test]
    fn test_serial_number_arithmetic32bit() {
        let e: u32 = 32;
        for i in 0..e {
            let series = 1_u32.wrapping_shl(i);
            let max_forward_distance: u32 = 1 << 31;

            for j in 1..DIV {
                let delta = (max_forward_distance / DIV).wrapping_mul(j);
                let a = series;
                let b = series.wrapping_add(delta);

                assert!(sna32lt(a, b), "sna32lt({a}, {b}) at i={i} j={j}");
                assert!(sna32lte(a, b));
                assert!(!sna32gt(a, b));
                assert!(!sna32gte(a, b) || a == b);
                assert!(sna32_is_newer(a, b));
                assert!(sna32_is_newer_or_equal(a, b));
            }

            assert!(sna32lte(series, series));
            assert!(sna32gte(series, series));
            assert!(sna32eq(series, series));
            assert!(!sna32lt(series, series));
            assert!(!sna32gt(series, series));
        }
    }

    #[test]
    fn test_serial_number_arithmetic16bit() {
        let e: u16 = 16;
        for i in 0..e {
            let series = 1_u16.wrapping_shl(i as u32);
            let max_forward_distance: u16 = 1 << 15;

            for j in 1..DIV as u16 {
                let delta = (max_forward_distance / DIV as u16).wrapping_mul(j);
                let a = series;
                let b = series.wrapping_add(delta);

                assert!(sna16lt(a, b), "sna16lt({a}, {b}) at i={i} j={j}");
                assert!(sna16lte(a, b));
                assert!(!sna16gt(a, b));
            }

            assert!(sna16lte(series, series));
            assert!(sna16gte(series, series));
            assert!(sna16eq(series, series));
        }
    }

    #[test]
    fn test_distance_picks_shorter_arc() {
        assert_eq!(sna32_distance(0, 10), 10);
        assert_eq!(sna32_distance(10, 0), 10);
        assert_eq!(sna32_distance(0, 0), 0);
        assert_eq!(sna32_distance(0, u32::MAX), 1);
        assert_eq!(sna32_distance(u32::MAX, 0), 1);
    }

    #[test]
    fn test_tsn_wrap_boundary() {
        let max = u32::MAX;
        assert!(sna32lt(max, 0));
        assert!(sna32_is_newer(max, 0));
        assert_eq!(max.wrapping_add(1), 0);
    }
}
