use crate::errors::Result;
use regex::Regex;

/// SQL keywords whose presence as the first token marks a statement as a write.
/// A leading `WITH` forces a whole-statement scan because CTE-wrapped writes
/// keep the mutating keyword in the body.
const WRITE_KEYWORDS: [&str; 8] = [
    "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "MERGE",
];

/// Extracts `@name` parameter placeholders from a SQL statement.
///
/// Names are returned in first-occurrence order with duplicates removed, which
/// is exactly the order engines assign indexes to named placeholders. The scan
/// is intentionally naive about string literals.
///
/// # Example
/// ```
/// use sqlgate::db::statement::scan_params;
///
/// let names = scan_params("SELECT * FROM t WHERE a = @x AND b = @y AND c = @x").unwrap();
/// assert_eq!(names, vec!["x", "y"]);
/// ```
pub fn scan_params(sql: &str) -> Result<Vec<String>> {
    let re = Regex::new(r"@(\w+)")?;

    let mut out: Vec<String> = Vec::new();
    for cap in re.captures_iter(sql) {
        if let Some(name) = cap.get(1) {
            let name = name.as_str();
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
    }

    Ok(out)
}

/// Classifies a SQL statement as a write (mutating) statement.
///
/// The decision is purely textual: the first token is uppercased and matched
/// against the write keyword set. Statements beginning with `WITH` are scanned
/// in full for any write keyword on a word boundary. No SQL parsing happens
/// here.
pub fn is_write(sql: &str) -> Result<bool> {
    let trimmed = sql.trim_start();
    let first_token = trimmed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase();

    if WRITE_KEYWORDS.contains(&first_token.as_str()) {
        return Ok(true);
    }

    if first_token == "WITH" {
        let upper = trimmed.to_uppercase();
        let re = Regex::new(r"\b(INSERT|UPDATE|DELETE|CREATE|DROP|ALTER|TRUNCATE|MERGE)\b")?;
        return Ok(re.is_match(&upper));
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_params_order_and_dedup() {
        let names = scan_params("UPDATE t SET a = @b, c = @a WHERE id = @b").unwrap();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_scan_params_none() {
        let names = scan_params("SELECT 1").unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_is_write_basic() {
        assert!(is_write("  insert into t values (1)").unwrap());
        assert!(!is_write("SELECT * FROM t").unwrap());
    }

    #[test]
    fn test_is_write_cte() {
        let sql = "WITH recent AS (SELECT id FROM t) DELETE FROM t WHERE id IN (SELECT id FROM recent)";
        assert!(is_write(sql).unwrap());
        let read = "WITH recent AS (SELECT id FROM t) SELECT * FROM recent";
        assert!(!is_write(read).unwrap());
    }
}
