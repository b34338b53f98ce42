//! Tenant (brokerage) key normalization.
//!
//! All job and result storage is partitioned by the canonical form returned
//! by [`normalize`]: lowercase ASCII words joined by single hyphens. Data
//! written before normalization existed may still sit under older spellings,
//! which [`variants`] enumerates so it can be found and consolidated.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static RE_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_\s]+").unwrap());
static RE_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]").unwrap());
static RE_HYPHEN_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());
static RE_CANONICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$").unwrap());

/// Spellings seen in production data for tenants onboarded before keys were
/// normalized.
const KNOWN_ALIASES: &[(&str, &[&str])] = &[
    (
        "augment-brokerage",
        &[
            "augment_brokerage",
            "Augment-Brokerage",
            "AUGMENT_BROKERAGE",
            "augment brokerage",
        ],
    ),
    (
        "eshipping",
        &["e-shipping", "E-Shipping", "E_SHIPPING", "eShipping"],
    ),
    (
        "test-brokerage",
        &[
            "test_brokerage",
            "Test-Brokerage",
            "TEST_BROKERAGE",
            "test brokerage",
        ],
    ),
];

/// Canonicalizes a tenant key. Never fails; input with no usable characters
/// yields an empty string.
pub fn normalize(key: &str) -> String {
    let lowered = key.trim().to_lowercase();
    let hyphenated = RE_SEPARATORS.replace_all(&lowered, "-");
    let stripped = RE_DISALLOWED.replace_all(&hyphenated, "");
    let collapsed = RE_HYPHEN_RUNS.replace_all(&stripped, "-");
    collapsed.trim_matches('-').to_string()
}

/// Returns true if `key` is already in canonical form.
pub fn is_canonical(key: &str) -> bool {
    RE_CANONICAL.is_match(key)
}

/// Registered legacy aliases for a canonical key.
pub fn known_aliases(canonical: &str) -> &'static [&'static str] {
    KNOWN_ALIASES
        .iter()
        .find(|(key, _)| *key == canonical)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Enumerates the plausible historical spellings of a tenant key, canonical
/// form first, without duplicates.
pub fn variants(key: &str) -> Vec<String> {
    let trimmed = key.trim();
    let canonical = normalize(key);
    if canonical.is_empty() {
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let words: Vec<String> = canonical.split('-').map(capitalize).collect();
    let underscored = canonical.replace('-', "_");

    let mut candidates = vec![canonical.clone()];
    candidates.extend(known_aliases(&canonical).iter().map(|a| a.to_string()));
    candidates.push(underscored.clone());
    candidates.push(words.join(" "));
    candidates.push(words.join("-"));
    candidates.push(words.join("_"));
    candidates.push(canonical.to_uppercase());
    candidates.push(underscored.to_uppercase());
    candidates.push(trimmed.to_string());

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.clone()))
        .collect()
}

/// Looks `key` up under each of its variants in order and returns the first hit.
pub fn find_by_variant<'a, V>(
    map: &'a BTreeMap<String, V>,
    key: &str,
) -> Option<(&'a String, &'a V)> {
    variants(key)
        .iter()
        .find_map(|variant| map.get_key_value(variant))
}

/// Returns every entry stored under some variant of `key`, in variant order.
pub fn find_all_by_variant<'a, V>(
    map: &'a BTreeMap<String, V>,
    key: &str,
) -> Vec<(&'a String, &'a V)> {
    variants(key)
        .iter()
        .filter_map(|variant| map.get_key_value(variant))
        .collect()
}

/// Values that can be "empty" for the purpose of consolidation.
pub trait EmptyValue {
    fn is_empty_value(&self) -> bool;
}

impl<T> EmptyValue for Vec<T> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl EmptyValue for String {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl EmptyValue for serde_json::Value {
    fn is_empty_value(&self) -> bool {
        match self {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }
}

/// Keys in `map` that belong to the same tenant as `key`: its variants in
/// order, then any other key that normalizes to the same canonical form.
fn matching_keys<V>(map: &BTreeMap<String, V>, key: &str, canonical: &str) -> Vec<String> {
    let mut matched: Vec<String> = variants(key)
        .into_iter()
        .filter(|variant| map.contains_key(variant))
        .collect();
    for existing in map.keys() {
        if !matched.contains(existing) && normalize(existing) == canonical {
            matched.push(existing.clone());
        }
    }
    matched
}

/// Merges every entry belonging to `key`'s tenant under the canonical key,
/// folding colliding values with `merge`. Returns the number of entries that
/// were folded together (0 when nothing changed).
pub fn consolidate_with<V, F>(map: &mut BTreeMap<String, V>, key: &str, mut merge: F) -> usize
where
    F: FnMut(V, V) -> V,
{
    let canonical = normalize(key);
    if canonical.is_empty() {
        return 0;
    }

    let matched = matching_keys(map, key, &canonical);
    if matched.is_empty() || (matched.len() == 1 && matched[0] == canonical) {
        return 0;
    }

    let mut values = matched.iter().filter_map(|k| map.remove(k));
    let Some(first) = values.next() else {
        return 0;
    };
    let merged = values.fold(first, &mut merge);
    map.insert(canonical, merged);
    matched.len()
}

/// [`consolidate_with`] using the default policy: keep the first non-empty
/// value and log any other non-empty value that gets dropped.
pub fn consolidate<V: EmptyValue>(map: &mut BTreeMap<String, V>, key: &str) -> usize {
    let canonical = normalize(key);
    consolidate_with(map, key, |kept, other| {
        if kept.is_empty_value() {
            other
        } else {
            if !other.is_empty_value() {
                log::warn!(
                    "Key collision while consolidating '{}': keeping first non-empty value",
                    canonical
                );
            }
            kept
        }
    })
}

/// Consolidates every tenant present in `map`.
pub fn consolidate_all_with<V, F>(map: &mut BTreeMap<String, V>, mut merge: F) -> usize
where
    F: FnMut(V, V) -> V,
{
    let mut canonicals: Vec<String> = map.keys().map(|k| normalize(k)).collect();
    canonicals.sort();
    canonicals.dedup();

    canonicals
        .iter()
        .filter(|canonical| !canonical.is_empty())
        .map(|canonical| consolidate_with(map, canonical, &mut merge))
        .sum()
}

/// [`consolidate_all_with`] with the default keep-first-non-empty policy.
pub fn consolidate_all<V: EmptyValue>(map: &mut BTreeMap<String, V>) -> usize {
    let mut canonicals: Vec<String> = map.keys().map(|k| normalize(k)).collect();
    canonicals.sort();
    canonicals.dedup();

    canonicals
        .iter()
        .filter(|canonical| !canonical.is_empty())
        .map(|canonical| consolidate(map, canonical))
        .sum()
}

/// Renames every key to its canonical form. When several keys collapse onto
/// one canonical key, an entry already stored under the canonical key wins,
/// otherwise the first in key order. Keys that normalize to nothing are kept
/// as-is.
pub fn migrate_keys<V>(map: BTreeMap<String, V>) -> BTreeMap<String, V> {
    let (already, legacy): (Vec<_>, Vec<_>) = map
        .into_iter()
        .partition(|(key, _)| normalize(key) == *key);

    let mut migrated: BTreeMap<String, V> = already.into_iter().collect();
    for (key, value) in legacy {
        let canonical = normalize(&key);
        if canonical.is_empty() {
            log::warn!("Key '{}' has no canonical form, leaving it unchanged", key);
            migrated.entry(key).or_insert(value);
            continue;
        }
        if migrated.contains_key(&canonical) {
            log::warn!(
                "Key collision migrating '{}' to '{}': keeping existing value",
                key,
                canonical
            );
            continue;
        }
        migrated.insert(canonical, value);
    }
    migrated
}

/// What a bulk key migration would do, without doing it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub total_keys: usize,
    pub keys_needing_migration: usize,
    /// Raw key to canonical key, for keys that would change.
    pub mapping: BTreeMap<String, String>,
    /// Canonical keys produced by more than one raw key.
    pub collisions: BTreeMap<String, Vec<String>>,
    /// Raw keys whose normalized form still fails [`is_canonical`].
    pub invalid_keys: Vec<String>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.keys_needing_migration == 0 && self.collisions.is_empty() && self.invalid_keys.is_empty()
    }
}

pub fn migration_report<'a, I>(keys: I) -> MigrationReport
where
    I: IntoIterator<Item = &'a str>,
{
    let mut report = MigrationReport::default();
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for key in keys {
        report.total_keys += 1;
        let canonical = normalize(key);
        if canonical != key {
            report.keys_needing_migration += 1;
            report.mapping.insert(key.to_string(), canonical.clone());
        }
        if !is_canonical(&canonical) {
            report.invalid_keys.push(key.to_string());
        }
        groups.entry(canonical).or_default().push(key.to_string());
    }

    report.collisions = groups
        .into_iter()
        .filter(|(_, originals)| originals.len() > 1)
        .collect();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_separators_and_case() {
        assert_eq!(normalize("Acme_Freight"), "acme-freight");
        assert_eq!(normalize("acme-freight"), "acme-freight");
        assert_eq!(normalize("ACME FREIGHT"), "acme-freight");
        assert_eq!(normalize("  Acme  __ Freight  "), "acme-freight");
        assert_eq!(normalize("--acme--freight--"), "acme-freight");
    }

    #[test]
    fn test_normalize_strips_disallowed() {
        assert_eq!(normalize("Acme & Sons, Inc."), "acme-sons-inc");
        assert_eq!(normalize("e.shipping"), "eshipping");
        assert_eq!(normalize("!!!"), "");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_is_canonical() {
        assert!(is_canonical("acme-freight"));
        assert!(is_canonical("eshipping"));
        assert!(is_canonical("a1-b2"));
        assert!(!is_canonical("Acme-Freight"));
        assert!(!is_canonical("1acme"));
        assert!(!is_canonical("acme--freight"));
        assert!(!is_canonical(""));
    }

    #[test]
    fn test_variants_order() {
        let v = variants("Acme_Freight");
        assert_eq!(v[0], "acme-freight");
        assert!(v.contains(&"acme_freight".to_string()));
        assert!(v.contains(&"Acme Freight".to_string()));
        assert!(v.contains(&"Acme-Freight".to_string()));
        assert!(v.contains(&"Acme_Freight".to_string()));
        assert!(v.contains(&"ACME-FREIGHT".to_string()));
        assert!(v.contains(&"ACME_FREIGHT".to_string()));

        let unique: HashSet<_> = v.iter().collect();
        assert_eq!(unique.len(), v.len());
    }

    #[test]
    fn test_variants_include_known_aliases() {
        let v = variants("eshipping");
        assert_eq!(v[0], "eshipping");
        assert_eq!(v[1], "e-shipping");
        assert!(v.contains(&"eShipping".to_string()));
    }

    #[test]
    fn test_variants_of_garbage() {
        assert!(variants("").is_empty());
        assert_eq!(variants(" !!! "), vec!["!!!".to_string()]);
    }

    #[test]
    fn test_find_by_variant() {
        let mut map = BTreeMap::new();
        map.insert("ACME_FREIGHT".to_string(), 1);
        let (key, value) = find_by_variant(&map, "acme freight").unwrap();
        assert_eq!(key, "ACME_FREIGHT");
        assert_eq!(*value, 1);
        assert!(find_by_variant(&map, "other").is_none());
    }

    #[test]
    fn test_find_by_variant_prefers_canonical() {
        let mut map = BTreeMap::new();
        map.insert("Acme Freight".to_string(), "legacy");
        map.insert("acme-freight".to_string(), "current");
        let (_, value) = find_by_variant(&map, "ACME_FREIGHT").unwrap();
        assert_eq!(*value, "current");
        assert_eq!(find_all_by_variant(&map, "acme-freight").len(), 2);
    }

    #[test]
    fn test_consolidate_keeps_first_non_empty() {
        let mut map: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        map.insert("acme-freight".to_string(), vec![]);
        map.insert("Acme_Freight".to_string(), vec![1, 2]);
        map.insert("ACME FREIGHT".to_string(), vec![3]);
        map.insert("other".to_string(), vec![9]);

        let merged = consolidate(&mut map, "Acme Freight");
        assert_eq!(merged, 3);
        assert_eq!(map.len(), 2);
        assert!(!map.get("acme-freight").unwrap().is_empty());
        assert_eq!(map.get("other"), Some(&vec![9]));
    }

    #[test]
    fn test_consolidate_with_merge_function() {
        let mut map: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        map.insert("acme-freight".to_string(), vec![1]);
        map.insert("Acme_Freight".to_string(), vec![2]);

        consolidate_with(&mut map, "acme-freight", |mut a, b| {
            a.extend(b);
            a
        });
        let mut values = map.remove("acme-freight").unwrap();
        values.sort();
        assert_eq!(values, vec![1, 2]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_consolidate_noop_when_canonical_only() {
        let mut map: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        map.insert("acme-freight".to_string(), vec![1]);
        assert_eq!(consolidate(&mut map, "acme-freight"), 0);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_consolidate_all() {
        let mut map: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        map.insert("Acme_Freight".to_string(), vec![1]);
        map.insert("acme-freight".to_string(), vec![2]);
        map.insert("Blue Line".to_string(), vec![3]);

        consolidate_all_with(&mut map, |mut a, b| {
            a.extend(b);
            a
        });
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("acme-freight").map(Vec::len), Some(2));
        assert_eq!(map.get("blue-line"), Some(&vec![3]));

        let mut names: BTreeMap<String, String> = BTreeMap::new();
        names.insert("ESHIPPING".to_string(), String::new());
        names.insert("eShipping".to_string(), "kept".to_string());
        assert_eq!(consolidate_all(&mut names), 2);
        assert_eq!(names.get("eshipping").map(String::as_str), Some("kept"));
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_migrate_keys_prefers_existing_canonical() {
        let mut map = BTreeMap::new();
        map.insert("ACME_FREIGHT".to_string(), "legacy");
        map.insert("acme-freight".to_string(), "current");
        map.insert("Blue Line".to_string(), "blue");

        let migrated = migrate_keys(map);
        assert_eq!(migrated.len(), 2);
        assert_eq!(migrated.get("acme-freight"), Some(&"current"));
        assert_eq!(migrated.get("blue-line"), Some(&"blue"));
    }

    #[test]
    fn test_migration_report() {
        let report = migration_report(["Acme_Freight", "acme-freight", "eshipping", "123 Go", "!!"]);
        assert_eq!(report.total_keys, 5);
        assert_eq!(report.keys_needing_migration, 3);
        assert_eq!(report.mapping.get("Acme_Freight").map(String::as_str), Some("acme-freight"));
        assert_eq!(
            report.collisions.get("acme-freight"),
            Some(&vec!["Acme_Freight".to_string(), "acme-freight".to_string()])
        );
        assert_eq!(report.invalid_keys, vec!["123 Go".to_string(), "!!".to_string()]);
        assert!(!report.is_clean());
        assert!(migration_report(["acme-freight"]).is_clean());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            #[test]
            fn normalize_is_idempotent(s in any::<String>()) {
                let once = normalize(&s);
                prop_assert_eq!(normalize(&once), once);
            }

            #[test]
            fn normalized_keys_are_canonical_or_empty(s in "[A-Za-z][A-Za-z0-9 _-]{0,24}") {
                let key = normalize(&s);
                prop_assert!(key.is_empty() || is_canonical(&key) || key.starts_with(|c: char| c.is_ascii_digit()));
            }

            #[test]
            fn any_variant_finds_stored_entry(
                words in prop::collection::vec("[a-z][a-z0-9]{0,7}", 1..4),
                pick in any::<prop::sample::Index>(),
            ) {
                let canonical = words.join("-");
                let all = variants(&canonical);
                let stored_under = pick.get(&all).clone();

                let mut map = BTreeMap::new();
                map.insert(stored_under.clone(), 7u32);

                let hit = find_by_variant(&map, &canonical).map(|(k, v)| (k.clone(), *v));
                prop_assert_eq!(hit, Some((stored_under.clone(), 7)));

                let from_variant = find_by_variant(&map, &stored_under).map(|(_, v)| *v);
                prop_assert_eq!(from_variant, Some(7));
            }
        }
    }
}
