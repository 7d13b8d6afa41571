//! Parsing for `humble-cli details` text output.
//!
//! The tool prints a human-oriented report: a bundle name line, a few
//! `Field : value` metadata lines, a pipe-separated items table, and an
//! optional keys table. The parser is lenient: sections that are missing
//! or malformed yield empty results rather than errors, because a bundle
//! with only game keys (no downloadable items) is a normal case.

use std::sync::LazyLock;

use regex::Regex;

/// Matches the items table header line (`# | Sub-item | ...`).
#[allow(clippy::expect_used)]
static ITEMS_HEADER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#\s*\|\s*Sub-item").expect("items header regex is valid") // Static pattern, safe to panic
});

/// Matches one items table row: `# | name | formats | size`.
#[allow(clippy::expect_used)]
static ITEM_ROW_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*\|\s*([^|]+?)\s*\|\s*([^|]+?)\s*\|\s*(.+)$")
        .expect("item row regex is valid") // Static pattern, safe to panic
});

/// Matches the keys table header line (`# | Key Name | ...`).
#[allow(clippy::expect_used)]
static KEYS_HEADER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#\s*\|\s*Key Name").expect("keys header regex is valid") // Static pattern, safe to panic
});

/// Matches one keys table row: `# | name | redeemed`.
#[allow(clippy::expect_used)]
static KEY_ROW_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*\|\s*([^|]+?)\s*\|\s*(.+)$").expect("key row regex is valid") // Static pattern, safe to panic
});

/// One downloadable item within a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleItem {
    /// Item number from the details table (1-based).
    pub number: u32,
    /// Item name.
    pub name: String,
    /// Available format variants, uppercased (e.g. `["EPUB", "MOBI"]`).
    pub formats: Vec<String>,
    /// Human-readable total size for the item.
    pub size: String,
}

/// One redeemable key within a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleKeyEntry {
    /// Key number from the details table (1-based).
    pub number: u32,
    /// Key name.
    pub name: String,
    /// Whether the key has been redeemed.
    pub redeemed: bool,
}

/// Structured `humble-cli details` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleDetails {
    /// Bundle name (first non-empty line).
    pub name: String,
    /// Purchase date as printed by the tool.
    pub purchased: String,
    /// Amount spent as printed by the tool.
    pub amount: String,
    /// Total bundle size as printed by the tool.
    pub total_size: String,
    /// Downloadable items; empty for key-only bundles.
    pub items: Vec<BundleItem>,
    /// Redeemable keys; usually empty for book bundles.
    pub keys: Vec<BundleKeyEntry>,
}

impl BundleDetails {
    /// Counts items offering the given format variant (case-insensitive).
    ///
    /// This is the collection total recorded in the ledger when one of
    /// those items finishes downloading.
    #[must_use]
    pub fn items_with_format(&self, variant: &str) -> u32 {
        let wanted = variant.to_uppercase();
        let matching = self
            .items
            .iter()
            .filter(|item| item.formats.iter().any(|format| *format == wanted))
            .count();
        u32::try_from(matching).unwrap_or(u32::MAX)
    }
}

/// Parses raw `humble-cli details` output into structured data.
#[must_use]
pub fn parse_bundle_details(details_output: &str) -> BundleDetails {
    let lines: Vec<&str> = details_output.trim().lines().collect();

    BundleDetails {
        name: parse_bundle_name(&lines),
        purchased: parse_metadata_field(&lines, "Purchased"),
        amount: parse_metadata_field(&lines, "Amount spent"),
        total_size: parse_metadata_field(&lines, "Total size"),
        items: parse_items_table(&lines),
        keys: parse_keys_table(&lines),
    }
}

fn parse_bundle_name(lines: &[&str]) -> String {
    lines
        .first()
        .map(|line| line.trim().to_string())
        .unwrap_or_default()
}

fn parse_metadata_field(lines: &[&str], field_name: &str) -> String {
    for line in lines {
        if line.contains(field_name) {
            if let Some((_, value)) = line.split_once(':') {
                return value.trim().to_string();
            }
        }
    }
    String::new()
}

fn parse_items_table(lines: &[&str]) -> Vec<BundleItem> {
    let mut items = Vec::new();

    // Skip header and separator line after the table header.
    let Some(table_start) = lines
        .iter()
        .position(|line| ITEMS_HEADER_PATTERN.is_match(line))
        .map(|index| index + 2)
    else {
        return items;
    };

    for line in lines.iter().skip(table_start) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // A section header like "Keys in this bundle:" ends the table.
        if trimmed.ends_with(':') {
            break;
        }

        if let Some(captures) = ITEM_ROW_PATTERN.captures(trimmed) {
            let Ok(number) = captures[1].parse::<u32>() else {
                continue;
            };
            let formats = captures[3]
                .split(',')
                .map(|format| format.trim().to_uppercase())
                .filter(|format| !format.is_empty())
                .collect();
            items.push(BundleItem {
                number,
                name: captures[2].trim().to_string(),
                formats,
                size: captures[4].trim().to_string(),
            });
        }
    }

    items
}

fn parse_keys_table(lines: &[&str]) -> Vec<BundleKeyEntry> {
    let mut keys = Vec::new();

    let Some(section_start) = lines
        .iter()
        .position(|line| line.contains("Keys in this bundle:"))
    else {
        return keys;
    };

    let Some(table_start) = lines[section_start..]
        .iter()
        .position(|line| KEYS_HEADER_PATTERN.is_match(line))
        .map(|index| section_start + index + 2)
    else {
        return keys;
    };

    for line in lines.iter().skip(table_start) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("Visit") {
            break;
        }

        if let Some(captures) = KEY_ROW_PATTERN.captures(trimmed) {
            let Ok(number) = captures[1].parse::<u32>() else {
                continue;
            };
            keys.push(BundleKeyEntry {
                number,
                name: captures[2].trim().to_string(),
                redeemed: captures[3].trim() == "Yes",
            });
        }
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DETAILS: &str = "\
Legend of the Jade Phoenix Bundle

Purchased : 12 March 2024
Amount spent : $15.00
Total size : 123.45 MiB

  # | Sub-item                                              | Format     | Total Size
----+-------------------------------------------------------+------------+------------
  1 | Falcon Guard (Legend of the Jade Phoenix, Book Three) | MOBI, EPUB |   3.47 MiB
  2 | Bloodname (Legend of the Jade Phoenix, Book Two)      | EPUB       |   2.11 MiB
  3 | Way of the Clans                                      | PDF        | 117.87 MiB
";

    const SAMPLE_WITH_KEYS: &str = "\
Game Key Bundle

Purchased : 1 June 2024
Amount spent : $25.00
Total size : 0 B

Keys in this bundle:

  # | Key Name                 | Redeemed
----+--------------------------+----------
  1 | Train Simulator Classic  |   Yes
  2 | City Builder Deluxe      |   No

Visit https://www.humblebundle.com/home/keys to redeem.
";

    #[test]
    fn test_parse_bundle_name_and_metadata() {
        let details = parse_bundle_details(SAMPLE_DETAILS);
        assert_eq!(details.name, "Legend of the Jade Phoenix Bundle");
        assert_eq!(details.purchased, "12 March 2024");
        assert_eq!(details.amount, "$15.00");
        assert_eq!(details.total_size, "123.45 MiB");
    }

    #[test]
    fn test_parse_items_table() {
        let details = parse_bundle_details(SAMPLE_DETAILS);
        assert_eq!(details.items.len(), 3);

        let first = &details.items[0];
        assert_eq!(first.number, 1);
        assert_eq!(first.name, "Falcon Guard (Legend of the Jade Phoenix, Book Three)");
        assert_eq!(first.formats, vec!["MOBI".to_string(), "EPUB".to_string()]);
        assert_eq!(first.size, "3.47 MiB");

        assert_eq!(details.items[2].formats, vec!["PDF".to_string()]);
    }

    #[test]
    fn test_parse_keys_table() {
        let details = parse_bundle_details(SAMPLE_WITH_KEYS);
        assert!(details.items.is_empty());
        assert_eq!(details.keys.len(), 2);
        assert_eq!(details.keys[0].name, "Train Simulator Classic");
        assert!(details.keys[0].redeemed);
        assert!(!details.keys[1].redeemed);
    }

    #[test]
    fn test_items_table_stops_at_section_header() {
        let mixed = format!(
            "{}\nKeys in this bundle:\n  9 | Should Not Appear | EPUB | 1 MiB\n",
            SAMPLE_DETAILS.trim_end()
        );
        let details = parse_bundle_details(&mixed);
        assert_eq!(details.items.len(), 3, "rows after a section header belong to it");
    }

    #[test]
    fn test_items_with_format_counts_case_insensitively() {
        let details = parse_bundle_details(SAMPLE_DETAILS);
        assert_eq!(details.items_with_format("epub"), 2);
        assert_eq!(details.items_with_format("PDF"), 1);
        assert_eq!(details.items_with_format("cbz"), 0);
    }

    #[test]
    fn test_parse_empty_output() {
        let details = parse_bundle_details("");
        assert_eq!(details.name, "");
        assert!(details.items.is_empty());
        assert!(details.keys.is_empty());
    }

    #[test]
    fn test_parse_missing_metadata_yields_empty_fields() {
        let details = parse_bundle_details("Just A Name\n\nno tables here\n");
        assert_eq!(details.name, "Just A Name");
        assert_eq!(details.purchased, "");
        assert_eq!(details.amount, "");
    }
}
