use std::collections::HashMap;

use adrecon_core::NaturalKey;

use crate::entities::ParsedRow;

/// Collapse rows sharing a natural key. The last occurrence's values win but
/// keep the position of the first occurrence. Rows without a key are never
/// collapsed.
///
/// Returns the surviving rows and how many were dropped.
pub fn dedupe_by_key<R: NaturalKey>(rows: Vec<ParsedRow<R>>) -> (Vec<ParsedRow<R>>, usize) {
    let total = rows.len();
    let mut slots: Vec<Option<ParsedRow<R>>> = Vec::with_capacity(total);
    let mut positions: HashMap<R::Key, usize> = HashMap::with_capacity(total);

    for row in rows {
        match row.record.natural_key() {
            Some(key) => {
                if let Some(&slot) = positions.get(&key) {
                    slots[slot] = Some(row);
                } else {
                    positions.insert(key, slots.len());
                    slots.push(Some(row));
                }
            }
            None => slots.push(Some(row)),
        }
    }

    let kept: Vec<ParsedRow<R>> = slots.into_iter().flatten().collect();
    let dropped = total - kept.len();
    (kept, dropped)
}
