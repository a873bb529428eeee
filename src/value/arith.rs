//! Scratch arithmetic: division by zero produces signed
//! infinities or NaN, `mod` is C `fmod`, and any non-numeric operand
//! coerces to zero.

use super::Value;

fn to_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Real(r) => *r,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Str(s, _) => s.as_str().trim().parse::<f64>().unwrap_or(0.0),
        Value::None | Value::List(..) | Value::IntPtr(_) => 0.0,
    }
}

/// Whether a value is an integer for the purposes of keeping an
/// add/sub/mul/neg result in the integer domain rather than promoting
/// to `Real`; `Bool` is numeric but always promotes through `Real` like
/// any other non-`Integer` operand, matching the reference engine.
fn as_integer(v: &Value) -> Option<i64> {
    match v {
        Value::Integer(i) => Some(*i),
        _ => None,
    }
}

pub fn add(lhs: &Value, rhs: &Value) -> Value {
    if let (Some(a), Some(b)) = (as_integer(lhs), as_integer(rhs)) {
        return Value::Integer(a.wrapping_add(b));
    }
    Value::Real(to_f64(lhs) + to_f64(rhs))
}

pub fn sub(lhs: &Value, rhs: &Value) -> Value {
    if let (Some(a), Some(b)) = (as_integer(lhs), as_integer(rhs)) {
        return Value::Integer(a.wrapping_sub(b));
    }
    Value::Real(to_f64(lhs) - to_f64(rhs))
}

pub fn mul(lhs: &Value, rhs: &Value) -> Value {
    if let (Some(a), Some(b)) = (as_integer(lhs), as_integer(rhs)) {
        return Value::Integer(a.wrapping_mul(b));
    }
    Value::Real(to_f64(lhs) * to_f64(rhs))
}

/// `x/0` for real `x != 0` is `+-Inf` matching `sign(x)`; `0/0` is `NaN`.
/// Division always promotes to `Real`.
pub fn div(lhs: &Value, rhs: &Value) -> Value {
    let (a, b) = (to_f64(lhs), to_f64(rhs));
    Value::Real(a / b)
}

/// `mod(x, y)` equals C `fmod(x, y)`; denominator 0 gives `NaN`.
pub fn rem(lhs: &Value, rhs: &Value) -> Value {
    let (a, b) = (to_f64(lhs), to_f64(rhs));
    Value::Real(a % b)
}

pub fn neg(v: &Value) -> Value {
    if let Some(i) = as_integer(v) {
        return Value::Integer(i.wrapping_neg());
    }
    Value::Real(-to_f64(v))
}

pub fn round(v: &Value) -> Value {
    Value::Integer(to_f64(v).round() as i64)
}

pub fn abs(v: &Value) -> Value {
    if let Some(i) = as_integer(v) {
        return Value::Integer(i.wrapping_abs());
    }
    Value::Real(to_f64(v).abs())
}

pub fn floor(v: &Value) -> Value {
    Value::Real(to_f64(v).floor())
}

pub fn ceil(v: &Value) -> Value {
    Value::Real(to_f64(v).ceil())
}

pub fn sqrt(v: &Value) -> Value {
    Value::Real(to_f64(v).sqrt())
}

pub fn sin_deg(v: &Value) -> Value {
    Value::Real(to_f64(v).to_radians().sin())
}
pub fn cos_deg(v: &Value) -> Value {
    Value::Real(to_f64(v).to_radians().cos())
}
pub fn tan_deg(v: &Value) -> Value {
    Value::Real(to_f64(v).to_radians().tan())
}
pub fn asin_deg(v: &Value) -> Value {
    Value::Real(to_f64(v).asin().to_degrees())
}
pub fn acos_deg(v: &Value) -> Value {
    Value::Real(to_f64(v).acos().to_degrees())
}
pub fn atan_deg(v: &Value) -> Value {
    Value::Real(to_f64(v).atan().to_degrees())
}
pub fn ln(v: &Value) -> Value {
    Value::Real(to_f64(v).ln())
}
pub fn log10(v: &Value) -> Value {
    Value::Real(to_f64(v).log10())
}
pub fn exp(v: &Value) -> Value {
    Value::Real(to_f64(v).exp())
}
pub fn exp10(v: &Value) -> Value {
    Value::Real(10f64.powf(to_f64(v)))
}

/// `rand`: uniform over the inclusive `[min, max]`, real-valued if
/// either argument is `Real`, otherwise integer-valued. `rng` yields a
/// uniform `f64` in `[0, 1)`.
pub fn rand(min: &Value, max: &Value, rng: &mut crate::rng::Rng) -> Value {
    let is_real = matches!(min, Value::Real(_)) || matches!(max, Value::Real(_));
    let (lo, hi) = (to_f64(min), to_f64(max));
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if is_real {
        Value::Real(lo + rng.next_f64() * (hi - lo))
    } else {
        let lo_i = lo.round() as i64;
        let hi_i = hi.round() as i64;
        if lo_i == hi_i {
            return Value::Integer(lo_i);
        }
        let span = (hi_i - lo_i + 1) as u64;
        Value::Integer(lo_i + (rng.next_u64() % span) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_signs_and_zero_over_zero() {
        match div(&Value::Real(5.0), &Value::Real(0.0)) {
            Value::Real(r) => assert!(r.is_infinite() && r > 0.0),
            _ => panic!(),
        }
        match div(&Value::Real(-5.0), &Value::Real(0.0)) {
            Value::Real(r) => assert!(r.is_infinite() && r < 0.0),
            _ => panic!(),
        }
        match div(&Value::Real(0.0), &Value::Real(0.0)) {
            Value::Real(r) => assert!(r.is_nan()),
            _ => panic!(),
        }
    }

    #[test]
    fn mod_matches_fmod() {
        match rem(&Value::Real(5.5), &Value::Real(2.0)) {
            Value::Real(r) => assert!((r - 1.5).abs() < 1e-9),
            _ => panic!(),
        }
        match rem(&Value::Real(5.0), &Value::Real(0.0)) {
            Value::Real(r) => assert!(r.is_nan()),
            _ => panic!(),
        }
    }

    #[test]
    fn non_numeric_operand_coerces_to_zero() {
        match add(&Value::Integer(1), &Value::from_string("abc")) {
            Value::Real(r) => assert_eq!(r, 1.0),
            _ => panic!(),
        }
    }

    #[test]
    fn integer_add_stays_integer() {
        assert!(matches!(add(&Value::Integer(1), &Value::Integer(2)), Value::Integer(3)));
    }
}
