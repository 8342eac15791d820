//! SQL statement builders shared by the relational drivers.

use crate::dialect::Dialect;
use crate::store::{SchemaDiff, TargetTable, WriteMode};
use weir_protocol::{ColumnSpec, Columns};

/// `"db"."schema_suffix"` or `"schema_suffix"`.
pub fn qualified_schema(d: &dyn Dialect, table: &TargetTable) -> String {
    match &table.database {
        Some(db) => format!("{}.{}", d.quote_ident(db), d.quote_ident(&table.qualified_schema())),
        None => d.quote_ident(&table.qualified_schema()),
    }
}

pub fn qualified_table(d: &dyn Dialect, table: &TargetTable) -> String {
    format!("{}.{}", qualified_schema(d, table), d.quote_ident(&table.table))
}

/// Stage tables live next to the target table.
pub fn qualified_stage(d: &dyn Dialect, table: &TargetTable, stage: &str) -> String {
    format!("{}.{}", qualified_schema(d, table), d.quote_ident(stage))
}

pub fn create_schema(d: &dyn Dialect, table: &TargetTable) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", qualified_schema(d, table))
}

fn column_ddl(d: &dyn Dialect, spec: &ColumnSpec) -> String {
    let mut ddl = format!("{} {}", d.quote_ident(&spec.name), d.column_type(spec.field_type));
    if d.declares_constraints() {
        if spec.not_null && !spec.primary_key {
            ddl.push_str(" NOT NULL");
        }
        if spec.unique && !spec.primary_key {
            ddl.push_str(" UNIQUE");
        }
    }
    ddl
}

pub fn create_table(d: &dyn Dialect, table: &TargetTable, columns: &Columns, if_not_exists: bool) -> String {
    let mut parts: Vec<String> = columns.iter().map(|c| column_ddl(d, c)).collect();
    let keys = columns.primary_keys();
    if d.declares_constraints() && !keys.is_empty() {
        let keys = keys.iter().map(|k| d.quote_ident(k)).collect::<Vec<_>>().join(", ");
        parts.push(format!("PRIMARY KEY ({})", keys));
    }
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        qualified_table(d, table),
        parts.join(", ")
    )
}

pub fn drop_table_if_exists(qualified: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified)
}

pub fn create_stage(d: &dyn Dialect, table: &TargetTable, stage: &str, columns: &Columns) -> String {
    let cols = columns
        .iter()
        .map(|c| format!("{} TEXT", d.quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", qualified_stage(d, table, stage), cols)
}

/// Multi-row INSERT statements for the stage table, each binding at most
/// `d.max_params()` parameters. Returns `(sql, rows_in_statement)` pairs.
pub fn stage_inserts(
    d: &dyn Dialect,
    table: &TargetTable,
    stage: &str,
    columns: &[String],
    row_count: usize,
) -> Vec<(String, usize)> {
    if columns.is_empty() || row_count == 0 {
        return Vec::new();
    }
    let rows_per_stmt = (d.max_params() / columns.len()).max(1);
    let target = qualified_stage(d, table, stage);
    let col_list = columns.iter().map(|c| d.quote_ident(c)).collect::<Vec<_>>().join(", ");

    let mut out = Vec::new();
    let mut remaining = row_count;
    while remaining > 0 {
        let n = remaining.min(rows_per_stmt);
        let mut param = 0;
        let values = (0..n)
            .map(|_| {
                let row = (0..columns.len())
                    .map(|_| {
                        param += 1;
                        d.placeholder(param)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", row)
            })
            .collect::<Vec<_>>()
            .join(", ");
        out.push((format!("INSERT INTO {} ({}) VALUES {}", target, col_list, values), n));
        remaining -= n;
    }
    out
}

fn cast(d: &dyn Dialect, spec: &ColumnSpec, alias: &str) -> String {
    format!(
        "CAST({}.{} AS {})",
        alias,
        d.quote_ident(&spec.name),
        d.column_type(spec.field_type)
    )
}

fn key_match(d: &dyn Dialect, columns: &Columns, keys: &[String]) -> String {
    keys.iter()
        .filter_map(|k| columns.get(k))
        .map(|spec| format!("t.{} = {}", d.quote_ident(&spec.name), cast(d, spec, "s")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Statements that move the stage table into the target for `mode`.
pub fn apply_stage(
    d: &dyn Dialect,
    table: &TargetTable,
    stage: &str,
    columns: &Columns,
    mode: &WriteMode,
) -> Vec<String> {
    let target = qualified_table(d, table);
    let stage_q = qualified_stage(d, table, stage);
    let col_list = columns
        .iter()
        .map(|c| d.quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let select_list = columns
        .iter()
        .map(|c| cast(d, c, "s"))
        .collect::<Vec<_>>()
        .join(", ");

    match mode {
        WriteMode::Replace | WriteMode::Append => vec![format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} AS s",
            target, col_list, select_list, stage_q
        )],
        WriteMode::Merge { keys } => {
            let matches = key_match(d, columns, keys);
            let mut stmts = Vec::new();
            let assignments = columns
                .iter()
                .filter(|c| !keys.contains(&c.name))
                .map(|c| format!("{} = {}", d.quote_ident(&c.name), cast(d, c, "s")))
                .collect::<Vec<_>>();
            if !assignments.is_empty() {
                stmts.push(format!(
                    "UPDATE {} AS t SET {} FROM {} AS s WHERE {}",
                    target,
                    assignments.join(", "),
                    stage_q,
                    matches
                ));
            }
            stmts.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {} AS s WHERE NOT EXISTS (SELECT 1 FROM {} AS t WHERE {})",
                target, col_list, select_list, stage_q, target, matches
            ));
            stmts
        }
    }
}

pub fn add_column(d: &dyn Dialect, table: &TargetTable, spec: &ColumnSpec) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        qualified_table(d, table),
        d.quote_ident(&spec.name),
        d.column_type(spec.field_type)
    )
}

pub fn drop_column(d: &dyn Dialect, table: &TargetTable, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        qualified_table(d, table),
        d.quote_ident(name)
    )
}

/// Plain identifiers are quoted; anything else (function calls, column
/// lists, sort orders) is passed through as an expression.
pub fn index_expr(d: &dyn Dialect, column_expr: &str) -> String {
    let is_ident = !column_expr.is_empty()
        && column_expr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_ident {
        d.quote_ident(column_expr)
    } else {
        column_expr.to_string()
    }
}

pub fn create_index(d: &dyn Dialect, name: &str, table: &TargetTable, column_expr: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        d.quote_ident(name),
        qualified_table(d, table),
        index_expr(d, column_expr)
    )
}

/// `(sql, params)` listing tables matching the target.
pub fn table_exists_query(d: &dyn Dialect, table: &TargetTable) -> (String, Vec<Option<String>>) {
    let mut sql = format!(
        "SELECT CAST(table_name AS TEXT) FROM information_schema.tables \
         WHERE CAST(table_schema AS TEXT) = {} AND CAST(table_name AS TEXT) = {}",
        d.placeholder(1),
        d.placeholder(2)
    );
    let mut params = vec![Some(table.qualified_schema()), Some(table.table.clone())];
    if let Some(db) = &table.database {
        sql.push_str(&format!(" AND CAST(table_catalog AS TEXT) = {}", d.placeholder(3)));
        params.push(Some(db.clone()));
    }
    (sql, params)
}

pub fn live_columns_query(d: &dyn Dialect, table: &TargetTable) -> (String, Vec<Option<String>>) {
    let mut sql = format!(
        "SELECT CAST(column_name AS TEXT) FROM information_schema.columns \
         WHERE CAST(table_schema AS TEXT) = {} AND CAST(table_name AS TEXT) = {}",
        d.placeholder(1),
        d.placeholder(2)
    );
    let mut params = vec![Some(table.qualified_schema()), Some(table.table.clone())];
    if let Some(db) = &table.database {
        sql.push_str(&format!(" AND CAST(table_catalog AS TEXT) = {}", d.placeholder(3)));
        params.push(Some(db.clone()));
    }
    sql.push_str(" ORDER BY ordinal_position");
    (sql, params)
}

/// Decide what evolution does given the live column names.
pub fn plan_evolution(live: &[String], desired: &Columns, allow_destructive: bool) -> SchemaDiff {
    let added = desired
        .iter()
        .filter(|c| !live.iter().any(|l| l == &c.name))
        .cloned()
        .collect();
    let removed = if allow_destructive {
        live.iter().filter(|l| !desired.contains(l)).cloned().collect()
    } else {
        Vec::new()
    };
    SchemaDiff { added, removed }
}
