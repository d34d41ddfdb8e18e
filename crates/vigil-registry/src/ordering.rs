//! Natural ordering for control ids.
//!
//! Benchmark ids are dotted section numbers, so `2.1.2` must sort before
//! `2.1.11`. Ids are split into runs of digits and non-digits; digit runs
//! compare numerically, everything else lexically. Ties fall back to a plain
//! string comparison so the order is total (`1.01` vs `1.1`).

use std::cmp::Ordering;

/// Compare two control ids in natural order.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = compare_chunk(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn compare_chunk(l: &str, r: &str) -> Ordering {
    let l_digits = l.as_bytes()[0].is_ascii_digit();
    let r_digits = r.as_bytes()[0].is_ascii_digit();

    match (l_digits, r_digits) {
        (true, true) => {
            // Arbitrary-length numbers: strip leading zeros, longer is larger.
            let l = l.trim_start_matches('0');
            let r = r.trim_start_matches('0');
            l.len().cmp(&r.len()).then_with(|| l.cmp(r))
        }
        // Digits sort before text at the same position.
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => l.cmp(r),
    }
}

/// Split into maximal runs of ASCII digits and non-digits. Never yields empty chunks.
fn chunks(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let digit = first.is_ascii_digit();
        let end = rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(ids: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        v.sort_by(|a, b| compare_ids(a, b));
        v
    }

    #[test]
    fn test_dotted_numeric_order() {
        assert_eq!(
            sorted(&["2.1.11", "2.1.2", "10.1", "2.1", "1.23"]),
            vec!["1.23", "2.1", "2.1.2", "2.1.11", "10.1"]
        );
    }

    #[test]
    fn test_mixed_alpha() {
        assert_eq!(
            sorted(&["AC-10", "AC-2", "AU-1", "AC-2(1)"]),
            vec!["AC-2", "AC-2(1)", "AC-10", "AU-1"]
        );
    }

    #[test]
    fn test_total_on_leading_zeros() {
        assert_eq!(compare_ids("1.01", "1.1"), "1.01".cmp("1.1"));
        assert_eq!(compare_ids("1.1", "1.1"), Ordering::Equal);
    }

    #[test]
    fn test_huge_numbers_do_not_overflow() {
        assert_eq!(
            compare_ids("99999999999999999999999", "100000000000000000000000"),
            Ordering::Less
        );
    }
}
