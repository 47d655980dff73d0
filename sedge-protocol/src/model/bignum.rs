/*!
Arbitrary precision numbers in the wire representation: a sign, a weight
(the exponent of the most significant base-10000 digit) and the digits
themselves, most significant first.
*/

/// An arbitrary precision integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigInt {
    pub(crate) negative: bool,
    pub(crate) weight: i16,
    pub(crate) digits: Vec<u16>,
}

/// An arbitrary precision decimal number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    pub(crate) negative: bool,
    pub(crate) weight: i16,
    pub(crate) decimal_digits: u16,
    pub(crate) digits: Vec<u16>,
}

impl BigInt {
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    fn normalize(mut self) -> BigInt {
        while let Some(0) = self.digits.last() {
            self.digits.pop();
        }
        while let Some(0) = self.digits.first() {
            self.digits.remove(0);
            self.weight -= 1;
        }
        self
    }

    pub(crate) fn from_raw(negative: bool, weight: i16, digits: Vec<u16>) -> BigInt {
        BigInt {
            negative,
            weight,
            digits,
        }
    }
}

impl Decimal {
    pub fn is_negative(&self) -> bool {
        self.negative
    }
    pub fn decimal_digits(&self) -> u16 {
        self.decimal_digits
    }

    pub(crate) fn from_raw(
        negative: bool,
        weight: i16,
        decimal_digits: u16,
        digits: Vec<u16>,
    ) -> Decimal {
        Decimal {
            negative,
            weight,
            decimal_digits,
            digits,
        }
    }
}

impl From<u64> for BigInt {
    fn from(v: u64) -> BigInt {
        BigInt {
            negative: false,
            weight: 4,
            digits: vec![
                (v / 10_000_000_000_000_000 % 10000) as u16,
                (v / 1_000_000_000_000 % 10000) as u16,
                (v / 100_000_000 % 10000) as u16,
                (v / 10000 % 10000) as u16,
                (v % 10000) as u16,
            ],
        }
        .normalize()
    }
}

impl From<i64> for BigInt {
    fn from(v: i64) -> BigInt {
        let (negative, value) = if v < 0 {
            (true, v.unsigned_abs())
        } else {
            (false, v as u64)
        };
        BigInt {
            negative,
            ..BigInt::from(value)
        }
    }
}

impl From<u32> for BigInt {
    fn from(v: u32) -> BigInt {
        BigInt::from(v as u64)
    }
}

impl From<i32> for BigInt {
    fn from(v: i32) -> BigInt {
        BigInt::from(v as i64)
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Decimal {
        let int = BigInt::from(v);
        Decimal {
            negative: int.negative,
            weight: int.weight,
            decimal_digits: 0,
            digits: int.digits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_int_conversion() {
        let x = BigInt::from(42i64);
        assert_eq!(x.weight, 0);
        assert_eq!(x.digits, &[42]);
        assert!(!x.negative);

        let x = BigInt::from(30000i64);
        assert_eq!(x.weight, 1);
        assert_eq!(x.digits, &[3]);

        let x = BigInt::from(-10001i64);
        assert_eq!(x.weight, 1);
        assert_eq!(x.digits, &[1, 1]);
        assert!(x.negative);

        let x = BigInt::from(0i64);
        assert_eq!(x.digits, &[] as &[u16]);
    }
}
