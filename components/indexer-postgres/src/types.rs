use std::error::Error;

use bytes::{BufMut, BytesMut};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};

const NUMERIC_SIGN_POS: u16 = 0x0000;
const NUMERIC_SIGN_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// An unsigned 128-bit integer stored in a postgres `NUMERIC` column. Token amounts are 18-decimal fixed-point integers
/// bounded by `(2^64 - 1) * 10^18`, which overflows `int8` but fits comfortably in a `u128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PgNumericU128(pub u128);

/// Splits a u128 into big-endian base-10000 digits, as the `NUMERIC` binary wire format expects.
fn base_10000_digits(mut value: u128) -> Vec<u16> {
    if value == 0 {
        return vec![0];
    }
    let mut digits = vec![];
    while value > 0 {
        digits.push((value % 10_000) as u16);
        value /= 10_000;
    }
    digits.reverse();
    digits
}

impl ToSql for PgNumericU128 {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        let digits = base_10000_digits(self.0);
        out.put_i16(digits.len() as i16);
        out.put_i16(digits.len() as i16 - 1); // weight
        out.put_u16(NUMERIC_SIGN_POS);
        out.put_u16(0); // dscale
        for digit in digits.into_iter() {
            out.put_u16(digit);
        }
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for PgNumericU128 {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<PgNumericU128, Box<dyn Error + Sync + Send>> {
        let ndigits = read_two_byte_word(raw, 0)?;
        let weight = read_two_byte_word(raw, 2)? as i16;
        let sign = read_two_byte_word(raw, 4)?;
        let _dscale = read_two_byte_word(raw, 6)?;
        if sign == NUMERIC_NAN {
            return Err("NUMERIC NaN cannot be read into a u128".into());
        }
        if sign == NUMERIC_SIGN_NEG {
            return Err("negative NUMERIC cannot be read into a u128".into());
        }
        let mut value: u128 = 0;
        for i in 0..ndigits {
            let digit = read_two_byte_word(raw, 8 + (i as usize) * 2)? as u128;
            let exponent = weight as i32 - i as i32;
            if exponent < 0 {
                // Our amounts are stored with dscale 0, any fractional digit group must be zero.
                if digit != 0 {
                    return Err("NUMERIC with a fractional part cannot be read into a u128".into());
                }
                continue;
            }
            let scaled = 10_000u128
                .checked_pow(exponent as u32)
                .and_then(|pow| digit.checked_mul(pow))
                .ok_or("NUMERIC value overflows u128")?;
            value = value
                .checked_add(scaled)
                .ok_or("NUMERIC value overflows u128")?;
        }
        Ok(PgNumericU128(value))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// An unsigned 8-bit integer stored in a postgres `SMALLINT` column, used for the BRC-20 `decimals` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PgSmallIntU8(pub u8);

impl ToSql for PgSmallIntU8 {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.put_i16(self.0 as i16);
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INT2
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for PgSmallIntU8 {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<PgSmallIntU8, Box<dyn Error + Sync + Send>> {
        let value = read_two_byte_word(raw, 0)? as i16;
        let value = u8::try_from(value).map_err(|e| format!("SMALLINT out of u8 range: {e}"))?;
        Ok(PgSmallIntU8(value))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INT2
    }
}

fn read_two_byte_word(raw: &[u8], offset: usize) -> Result<u16, Box<dyn Error + Sync + Send>> {
    let bytes: [u8; 2] = raw
        .get(offset..offset + 2)
        .ok_or("truncated binary value")?
        .try_into()?;
    Ok(u16::from_be_bytes(bytes))
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use test_case::test_case;
    use tokio_postgres::types::{FromSql, ToSql, Type};

    use super::{PgNumericU128, PgSmallIntU8};

    #[test_case(0; "zero")]
    #[test_case(1; "one")]
    #[test_case(9_999; "single digit group")]
    #[test_case(10_000; "digit group boundary")]
    #[test_case(21_000_000_000_000_000_000_000_000; "typical max supply")]
    #[test_case(u64::MAX as u128 * 1_000_000_000_000_000_000; "amount upper bound")]
    #[test_case(u128::MAX; "u128 max")]
    fn numeric_u128_round_trips(value: u128) {
        let mut buf = BytesMut::new();
        PgNumericU128(value).to_sql(&Type::NUMERIC, &mut buf).unwrap();
        let decoded = PgNumericU128::from_sql(&Type::NUMERIC, &buf).unwrap();
        assert_eq!(decoded.0, value);
    }

    #[test]
    fn numeric_rejects_negative_sign() {
        // -1 in NUMERIC binary format.
        let raw: [u8; 10] = [0, 1, 0, 0, 0x40, 0, 0, 0, 0, 1];
        assert!(PgNumericU128::from_sql(&Type::NUMERIC, &raw).is_err());
    }

    #[test_case(0; "zero")]
    #[test_case(18; "max decimals")]
    #[test_case(u8::MAX; "u8 max")]
    fn small_int_u8_round_trips(value: u8) {
        let mut buf = BytesMut::new();
        PgSmallIntU8(value).to_sql(&Type::INT2, &mut buf).unwrap();
        let decoded = PgSmallIntU8::from_sql(&Type::INT2, &buf).unwrap();
        assert_eq!(decoded.0, value);
    }
}
