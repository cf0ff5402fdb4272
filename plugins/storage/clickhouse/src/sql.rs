use serde::{Deserialize, Serialize};

use etl_api::{DomainEvent, EtlError, datetime_from_ms};

// ════════════════════════════════════════════════════════════════
//  Identifier validation
// ════════════════════════════════════════════════════════════════

/// Validate a ClickHouse identifier (database, table, cluster).
/// Allowed: `^[a-zA-Z_][a-zA-Z0-9_]*$`.
pub fn validate_identifier(name: &str, context: &str) -> Result<(), EtlError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(EtlError::config(format!("{context}: identifier is empty")));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(EtlError::config(format!(
            "{context}: invalid identifier '{name}', must start with a letter or underscore"
        )));
    }
    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(EtlError::config(format!(
                "{context}: invalid character '{ch}' in identifier '{name}'"
            )));
        }
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════
//  DDL
// ════════════════════════════════════════════════════════════════

/// Target columns and the types `DESCRIBE TABLE` must report for them.
pub const COLUMNS: [(&str, &str); 4] = [
    ("actor_id", "UUID"),
    ("subject_id", "UUID"),
    ("metric", "Int32"),
    ("event_time", "DateTime64(3, 'UTC')"),
];

fn on_cluster(cluster: Option<&str>) -> String {
    match cluster {
        Some(c) => format!(" ON CLUSTER {c}"),
        None => String::new(),
    }
}

pub fn create_database(database: &str, cluster: Option<&str>) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {database}{}", on_cluster(cluster))
}

pub fn create_table(database: &str, table: &str, cluster: Option<&str>) -> String {
    let columns: Vec<String> = COLUMNS.iter().map(|(name, ty)| format!("    {name} {ty}")).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {database}.{table}{} (\n{}\n) ENGINE = MergeTree()\nORDER BY (actor_id, subject_id)",
        on_cluster(cluster),
        columns.join(",\n"),
    )
}

pub fn describe_table(database: &str, table: &str) -> String {
    format!("DESCRIBE TABLE {database}.{table} FORMAT JSONEachRow")
}

#[derive(Deserialize)]
struct DescribeRow {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

fn normalize_type(ty: &str) -> String {
    ty.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Check `DESCRIBE TABLE ... FORMAT JSONEachRow` output against [`COLUMNS`].
/// Extra columns are allowed; missing or differently typed ones are not.
pub fn verify_columns(describe_body: &str) -> Result<(), EtlError> {
    let mut found = Vec::new();
    for line in describe_body.lines().filter(|l| !l.trim().is_empty()) {
        let row: DescribeRow = serde_json::from_str(line)
            .map_err(|e| EtlError::format(format!("parse DESCRIBE row: {e}")))?;
        found.push(row);
    }

    for (name, expected) in COLUMNS {
        match found.iter().find(|r| r.name == name) {
            None => return Err(EtlError::schema(format!("column '{name}' is missing"))),
            Some(row) if normalize_type(&row.ty) != normalize_type(expected) => {
                return Err(EtlError::schema(format!(
                    "column '{name}' has type {}, expected {expected}",
                    row.ty
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════
//  DML
// ════════════════════════════════════════════════════════════════

pub fn insert_statement(database: &str, table: &str) -> String {
    let names: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
    format!(
        "INSERT INTO {database}.{table} ({}) FORMAT JSONEachRow",
        names.join(", ")
    )
}

#[derive(Serialize)]
struct InsertRow {
    actor_id: String,
    subject_id: String,
    metric: i32,
    event_time: String,
}

/// One JSON object per line, in the column order of [`COLUMNS`].
pub fn insert_body(events: &[DomainEvent]) -> Result<String, EtlError> {
    let mut body = String::new();
    for event in events {
        let at = datetime_from_ms(event.event_time).ok_or_else(|| {
            EtlError::format(format!("event_time {} is out of range", event.event_time))
        })?;
        let row = InsertRow {
            actor_id: event.actor_id.hyphenated().to_string(),
            subject_id: event.subject_id.hyphenated().to_string(),
            metric: event.metric,
            event_time: at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        };
        body.push_str(&serde_json::to_string(&row)?);
        body.push('\n');
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use etl_api::ErrorKind;

    #[test]
    fn identifiers() {
        assert!(validate_identifier("shard", "database").is_ok());
        assert!(validate_identifier("_views_2", "table").is_ok());
        assert!(validate_identifier("", "table").is_err());
        assert!(validate_identifier("1views", "table").is_err());
        assert!(validate_identifier("views; DROP TABLE x", "table").is_err());
        assert!(validate_identifier("shard.views", "table").is_err());
    }

    #[test]
    fn ddl_without_cluster() {
        assert_eq!(create_database("shard", None), "CREATE DATABASE IF NOT EXISTS shard");
        let ddl = create_table("shard", "views", None);
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS shard.views ("));
        assert!(ddl.contains("event_time DateTime64(3, 'UTC')"));
        assert!(ddl.ends_with("ENGINE = MergeTree()\nORDER BY (actor_id, subject_id)"));
    }

    #[test]
    fn ddl_on_cluster() {
        assert_eq!(
            create_database("shard", Some("company_cluster")),
            "CREATE DATABASE IF NOT EXISTS shard ON CLUSTER company_cluster"
        );
        assert!(
            create_table("shard", "views", Some("company_cluster"))
                .starts_with("CREATE TABLE IF NOT EXISTS shard.views ON CLUSTER company_cluster (")
        );
    }

    #[test]
    fn insert_rows_are_ndjson() {
        let actor = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let subject = Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap();
        let body = insert_body(&[DomainEvent {
            actor_id: actor,
            subject_id: subject,
            metric: 42,
            event_time: 1_700_000_000_123,
        }])
        .unwrap();
        assert_eq!(
            body,
            "{\"actor_id\":\"11111111-1111-1111-1111-111111111111\",\
             \"subject_id\":\"22222222-2222-2222-2222-222222222222\",\
             \"metric\":42,\"event_time\":\"2023-11-14 22:13:20.123\"}\n"
        );
        assert_eq!(
            insert_statement("shard", "views"),
            "INSERT INTO shard.views (actor_id, subject_id, metric, event_time) FORMAT JSONEachRow"
        );
    }

    #[test]
    fn matching_describe_passes() {
        let body = r#"{"name":"actor_id","type":"UUID","default_type":""}
{"name":"subject_id","type":"UUID","default_type":""}
{"name":"metric","type":"Int32","default_type":""}
{"name":"event_time","type":"DateTime64(3,'UTC')","default_type":""}
"#;
        verify_columns(body).unwrap();
    }

    #[test]
    fn incompatible_describe_is_schema_error() {
        let body = r#"{"name":"actor_id","type":"UUID"}
{"name":"subject_id","type":"UUID"}
{"name":"metric","type":"String"}
{"name":"event_time","type":"DateTime64(3, 'UTC')"}"#;
        let err = verify_columns(body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.message().contains("metric"));

        let err = verify_columns(r#"{"name":"actor_id","type":"UUID"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }
}
