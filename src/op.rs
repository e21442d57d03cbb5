use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumMessage;
use strum::EnumString;
use strum::IntoStaticStr;
use strum::VariantArray;

use crate::error::Fault;
use crate::value::EPSILON;
use crate::value::Value;

/// Largest argument `EXP` accepts before the result overflows an `f64`.
const EXP_LIMIT: f64 = 709.782_712_893_384;

/// The function library. Names double as the serialized operator codes.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Display,
    EnumString,
    EnumMessage,
    IntoStaticStr,
    VariantArray,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Op {
    #[strum(message = "x + y")]
    Add,
    #[strum(message = "x - y")]
    Sub,
    #[strum(message = "x * y")]
    Mul,
    #[strum(message = "x / y, faults when y is zero")]
    Div,
    #[strum(message = "smaller of x and y")]
    Min,
    #[strum(message = "larger of x and y")]
    Max,
    #[strum(message = "x raised to y")]
    Pow,

    #[strum(message = "-x")]
    Neg,
    #[strum(message = "1 / x, faults when x is zero")]
    Inv,
    #[strum(message = "|x|")]
    Abs,
    #[strum(message = "square root, faults on negatives")]
    Sqrt,
    #[strum(message = "natural log, faults on non-positives")]
    Log,
    #[strum(message = "e raised to x, faults on overflow")]
    Exp,
    #[strum(message = "sine")]
    Sin,
    #[strum(message = "cosine")]
    Cos,
}

impl Op {
    pub const fn arity(self) -> usize {
        use Op::*;
        match self {
            Add | Sub | Mul | Div | Min | Max | Pow => 2,
            Neg | Inv | Abs | Sqrt | Log | Exp | Sin | Cos => 1,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Applies the operator to already executed arguments.
    ///
    /// `args` must hold exactly [`arity`](Self::arity) values. Domain
    /// violations and non-finite results come back as a [`Fault`].
    pub fn apply(self, args: &[Value]) -> Result<Value, Fault> {
        use Op::*;
        debug_assert_eq!(args.len(), self.arity());
        let x = args[0].0;
        let y = args.get(1).map_or(0.0, |v| v.0);
        let domain = |input: f64| Fault::Domain { op: self, input };

        let out = match self {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => {
                if y.abs() < EPSILON {
                    return Err(domain(y));
                }
                x / y
            }
            Min => x.min(y),
            Max => x.max(y),
            Pow => x.powf(y),
            Neg => -x,
            Inv => {
                if x.abs() < EPSILON {
                    return Err(domain(x));
                }
                x.recip()
            }
            Abs => x.abs(),
            Sqrt => {
                if x < 0.0 {
                    return Err(domain(x));
                }
                x.sqrt()
            }
            Log => {
                if x <= 0.0 {
                    return Err(domain(x));
                }
                x.ln()
            }
            Exp => {
                if x > EXP_LIMIT {
                    return Err(domain(x));
                }
                x.exp()
            }
            Sin => x.sin(),
            Cos => x.cos(),
        };

        if out.is_finite() {
            Ok(Value(out))
        } else {
            Err(Fault::NonFinite { op: self })
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn names_parse_back() {
        for op in Op::VARIANTS {
            assert_eq!(Op::from_str(op.name()), Ok(*op));
            assert!(op.get_message().is_some());
        }
        assert_eq!(Op::Sub.to_string(), "SUB");
        assert!(Op::from_str("sub").is_err());
    }

    #[test]
    fn arity_matches_argument_use() {
        assert_eq!(Op::Sub.apply(&[Value(5.0), Value(2.0)]), Ok(Value(3.0)));
        assert_eq!(Op::Inv.apply(&[Value(2.0)]), Ok(Value(0.5)));
        assert_eq!(Op::Neg.arity(), 1);
        assert_eq!(Op::Pow.arity(), 2);
    }

    #[test]
    fn domain_faults() {
        assert_eq!(
            Op::Inv.apply(&[Value(0.0)]),
            Err(Fault::Domain {
                op: Op::Inv,
                input: 0.0
            })
        );
        assert!(Op::Div.apply(&[Value(1.0), Value(1e-13)]).is_err());
        assert!(Op::Log.apply(&[Value(0.0)]).is_err());
        assert!(Op::Log.apply(&[Value(-1.0)]).is_err());
        assert!(Op::Sqrt.apply(&[Value(-4.0)]).is_err());
        assert!(Op::Exp.apply(&[Value(1000.0)]).is_err());
        assert_eq!(Op::Sqrt.apply(&[Value(4.0)]), Ok(Value(2.0)));
    }

    #[test]
    fn non_finite_results_fault() {
        assert_eq!(
            Op::Pow.apply(&[Value(-8.0), Value(0.5)]),
            Err(Fault::NonFinite { op: Op::Pow })
        );
        assert_eq!(
            Op::Mul.apply(&[Value(f64::MAX), Value(10.0)]),
            Err(Fault::NonFinite { op: Op::Mul })
        );
    }
}
