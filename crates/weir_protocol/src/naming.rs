//! Deterministic names for objects the loader creates in the target store.

use blake3::Hasher;

const SEP: u8 = 0x1f;
const INDEX_PREFIX: &str = "__weir_";
/// 28 digest bytes render as 56 hex chars; with the prefix the name is 63
/// chars, the PostgreSQL identifier limit.
const INDEX_DIGEST_BYTES: usize = 28;

fn hash_parts(parts: &[&str]) -> blake3::Hash {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize()
}

/// Fixed-length index name derived from schema, table and column expression.
///
/// Hashing avoids the truncation collisions that `{table}_{column}` style
/// names hit once they exceed the identifier length limit.
pub fn index_name(schema: &str, table: &str, column_expr: &str) -> String {
    let hash = hash_parts(&[schema, table, column_expr]);
    let hex = hash.to_hex();
    format!("{}{}", INDEX_PREFIX, &hex[..INDEX_DIGEST_BYTES * 2])
}

/// Staging table used while writing one chunk of a run.
pub fn stage_table_name(run_id: &str, table: &str) -> String {
    let hash = hash_parts(&[run_id, table]);
    format!("__weir_stage_{}", &hash.to_hex()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_name_is_63_chars() {
        let name = index_name("raw_next", "orders", "created_at");
        assert_eq!(name.len(), 63);
        assert!(name.starts_with("__weir_"));
        assert!(name[7..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn index_name_separates_components() {
        assert_ne!(index_name("ab", "c", "d"), index_name("a", "bc", "d"));
    }

    #[test]
    fn stage_table_is_per_run() {
        assert_ne!(stage_table_name("run-a", "orders"), stage_table_name("run-b", "orders"));
        assert_eq!(stage_table_name("run-a", "orders"), stage_table_name("run-a", "orders"));
    }
}
