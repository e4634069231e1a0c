//! Custom collation for human-facing alphabetical ordering.
//!
//! Names in the corpus mix Cyrillic and Latin scripts. For browsing,
//! Cyrillic letters sort before Latin letters, and both sort before any
//! other character. Within each alphabet the fixed sequence below decides
//! the order; characters outside both alphabets fall back to raw code
//! point comparison.

use std::cmp::Ordering;

use crate::corpus::BookRecord;

/// Cyrillic letters in collation order, upper case before lower case.
const CYRILLIC: &str = "АаБбВвГгДдЕеЁёЖжЗзИиЙйКкЛлМмНнОоПпРрСсТтУуФфХхЦцЧчШшЩщЪъЫыЬьЭэЮюЯя";

/// Latin letters in collation order, upper case before lower case.
const LATIN: &str = "AaBbCcDdEeFfGgHhIiJjKkLlMmNnOoPpQqRrSsTtUuVvWwXxYyZz";

/// Collation priority of a single character: alphabet tier, then rank.
///
/// Tier 0 is Cyrillic, tier 1 is Latin, tier 2 is everything else ranked
/// by code point. A character from a known alphabet therefore always
/// precedes one outside it, even when the raw code points say otherwise.
fn char_priority(c: char) -> (u8, u32) {
    if let Some(pos) = CYRILLIC.chars().position(|a| a == c) {
        return (0, pos as u32);
    }
    if let Some(pos) = LATIN.chars().position(|a| a == c) {
        return (1, pos as u32);
    }
    (2, c as u32)
}

/// Compare two name strings under the custom alphabet order.
///
/// Walks both strings in lock-step; the first position where the
/// character priorities differ decides the result. A strict prefix sorts
/// before the longer string.
pub fn compare(a: &str, b: &str) -> Ordering {
    let mut ia = a.chars();
    let mut ib = b.chars();

    loop {
        match (ia.next(), ib.next()) {
            (Some(ca), Some(cb)) => {
                let ord = char_priority(ca).cmp(&char_priority(cb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        }
    }
}

/// Compare two book records by title under the custom alphabet order.
pub fn compare_titles(a: &BookRecord, b: &BookRecord) -> Ordering {
    compare(&a.book_title, &b.book_title)
}
