//! Channel version allocation.
//!
//! Versions look like `{counter:032}.{fraction:016}`. The counter advances
//! from the current version; the random fraction keeps two uncoordinated
//! writers that start from the same counter from producing the same key.
//! Fixed-width zero padding makes string order equal numeric order.

use ny_domain::error::{Error, Result};
use rand::Rng;

const FRACTION_SPAN: u64 = 10_000_000_000_000_000;

/// Allocate a version strictly greater than `current`. `None` starts the
/// counter at 0, so the first version has counter 1.
pub fn next_version(current: Option<&str>) -> Result<String> {
    let counter = match current {
        None => 0,
        Some(v) => parse_counter(v)?,
    };
    let next = counter
        .checked_add(1)
        .ok_or_else(|| Error::Integrity(format!("version counter overflow after '{counter}'")))?;
    let fraction = rand::thread_rng().gen_range(0..FRACTION_SPAN);
    Ok(format!("{next:032}.{fraction:016}"))
}

/// Counter part of a version. Plain integers are accepted too.
pub fn parse_counter(version: &str) -> Result<u64> {
    let head = version.split('.').next().unwrap_or(version);
    head.parse::<u64>()
        .map_err(|_| Error::Integrity(format!("unparsable channel version '{version}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_starts_at_one() {
        let v = next_version(None).unwrap();
        assert_eq!(parse_counter(&v).unwrap(), 1);
        assert_eq!(v.len(), 32 + 1 + 16);
    }

    #[test]
    fn strictly_increasing_chain() {
        let mut current = next_version(None).unwrap();
        for _ in 0..50 {
            let next = next_version(Some(&current)).unwrap();
            assert!(next > current, "{next} <= {current}");
            current = next;
        }
    }

    #[test]
    fn ordering_holds_across_digit_boundaries() {
        let nine = next_version(Some("8")).unwrap();
        let ten = next_version(Some(&nine)).unwrap();
        assert!(ten > nine);
        assert_eq!(parse_counter(&ten).unwrap(), 10);
    }

    #[test]
    fn siblings_from_same_parent_differ() {
        let base = next_version(None).unwrap();
        let a = next_version(Some(&base)).unwrap();
        let b = next_version(Some(&base)).unwrap();
        assert_eq!(parse_counter(&a).unwrap(), parse_counter(&b).unwrap());
        // 1 in 10^16 chance of a false failure.
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_is_integrity_violation() {
        assert!(next_version(Some("abc.1")).unwrap_err().is_integrity());
    }
}
