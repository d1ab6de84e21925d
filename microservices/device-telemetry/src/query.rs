//! SQL construction for alarm queries
//!
//! Property names are bound as parameters where the store allows it. Device
//! and status lists cannot be parameterized inside `IN (...)` and time bounds
//! are rendered as literal epoch milliseconds, so every caller-supplied
//! identifier is checked against a strict allow-list before any text is built.

use chrono::{DateTime, Utc};
use serde_json::Value;
use telemetry_docdb::{QueryParameter, SqlQuerySpec};

use crate::error::{AlarmsError, Result};

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | ';' | '.' | ',' | '_' | '-')
}

/// Reject anything outside `[A-Za-z0-9:;.,_-]`. Empty input passes.
pub fn validate_identifier(input: &str) -> Result<()> {
    if input.chars().all(is_allowed) {
        Ok(())
    } else {
        Err(AlarmsError::InvalidInput(format!(
            "Input '{}' contains invalid characters",
            input.escape_default()
        )))
    }
}

fn validate_all<S: AsRef<str>>(inputs: &[S]) -> Result<()> {
    inputs.iter().try_for_each(|s| validate_identifier(s.as_ref()))
}

fn optional(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

fn strings<S: AsRef<str>>(values: &[S]) -> Value {
    Value::Array(values.iter().map(|s| Value::from(s.as_ref())).collect())
}

/// Shared `WHERE (...)` body up to, but not including, the closing paren.
struct Predicate<'a> {
    by_id: Option<&'a str>,
    by_id_property: Option<&'a str>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    devices: &'a [String],
    devices_property: &'a str,
}

impl Predicate<'_> {
    fn validate(&self) -> Result<()> {
        validate_identifier(self.devices_property)?;
        validate_all(self.devices)?;
        if let Some(id) = self.by_id {
            validate_identifier(id)?;
        }
        if let Some(property) = self.by_id_property {
            validate_identifier(property)?;
        }
        Ok(())
    }

    fn render(&self, sql: &mut String) {
        sql.push_str("c[\"doc.schema\"] = @schemaName");

        if !self.devices.is_empty() {
            sql.push_str(&format!(
                " AND c['{}'] IN ('{}')",
                self.devices_property,
                self.devices.join("', '")
            ));
        }

        let by_id_present = self.by_id.is_some_and(|v| !v.is_empty())
            && self.by_id_property.is_some_and(|v| !v.is_empty());
        if by_id_present {
            sql.push_str(" AND c[@byIdProperty] = @byId");
        }

        if let Some(from) = self.from {
            sql.push_str(&format!(" AND c[@fromProperty] >= {}", from.timestamp_millis()));
        }

        if let Some(to) = self.to {
            sql.push_str(&format!(" AND c[@toProperty] <= {}", to.timestamp_millis()));
        }
    }
}

/// Paged document listing.
#[derive(Debug, Clone)]
pub struct DocumentsQuery<'a> {
    pub schema_name: &'a str,
    pub by_id: Option<&'a str>,
    pub by_id_property: Option<&'a str>,
    pub from: Option<DateTime<Utc>>,
    pub from_property: &'a str,
    pub to: Option<DateTime<Utc>>,
    pub to_property: &'a str,
    pub order: Option<&'a str>,
    pub order_property: &'a str,
    pub skip: usize,
    pub limit: Option<usize>,
    pub devices: &'a [String],
    pub devices_property: &'a str,
}

impl DocumentsQuery<'_> {
    pub fn build(&self) -> Result<SqlQuerySpec> {
        validate_all(&[
            self.schema_name,
            self.from_property,
            self.to_property,
            self.order_property,
        ])?;
        let predicate = Predicate {
            by_id: self.by_id,
            by_id_property: self.by_id_property,
            from: self.from,
            to: self.to,
            devices: self.devices,
            devices_property: self.devices_property,
        };
        predicate.validate()?;

        let mut sql = String::from(if self.limit.is_some() {
            "SELECT TOP @top * FROM c WHERE ("
        } else {
            "SELECT * FROM c WHERE ("
        });
        predicate.render(&mut sql);
        sql.push(')');

        let ascending = self.order.is_some_and(|o| o.eq_ignore_ascii_case("asc"));
        sql.push_str(if ascending {
            " ORDER BY c[@orderProperty] ASC"
        } else {
            " ORDER BY c[@orderProperty] DESC"
        });

        let mut parameters = Vec::with_capacity(9);
        if let Some(limit) = self.limit {
            parameters.push(QueryParameter::new("@top", self.skip.saturating_add(limit)));
        }
        parameters.extend([
            QueryParameter::new("@schemaName", self.schema_name),
            QueryParameter::new("@devicesProperty", self.devices_property),
            QueryParameter::new("@devices", strings(self.devices)),
            QueryParameter::new("@byIdProperty", optional(self.by_id_property)),
            QueryParameter::new("@byId", optional(self.by_id)),
            QueryParameter::new("@fromProperty", self.from_property),
            QueryParameter::new("@toProperty", self.to_property),
            QueryParameter::new("@orderProperty", self.order_property),
        ]);

        Ok(SqlQuerySpec::with_parameters(sql, parameters))
    }
}

/// `COUNT(1)` over the same predicate plus a value allow-list.
#[derive(Debug, Clone)]
pub struct CountQuery<'a> {
    pub schema_name: &'a str,
    pub by_id: Option<&'a str>,
    pub by_id_property: Option<&'a str>,
    pub from: Option<DateTime<Utc>>,
    pub from_property: &'a str,
    pub to: Option<DateTime<Utc>>,
    pub to_property: &'a str,
    pub devices: &'a [String],
    pub devices_property: &'a str,
    pub filter_values: &'a [&'a str],
    pub filter_property: &'a str,
}

impl CountQuery<'_> {
    pub fn build(&self) -> Result<SqlQuerySpec> {
        validate_all(&[
            self.schema_name,
            self.from_property,
            self.to_property,
            self.filter_property,
        ])?;
        validate_all(self.filter_values)?;
        let predicate = Predicate {
            by_id: self.by_id,
            by_id_property: self.by_id_property,
            from: self.from,
            to: self.to,
            devices: self.devices,
            devices_property: self.devices_property,
        };
        predicate.validate()?;

        let mut sql = String::from("SELECT VALUE COUNT(1) FROM c WHERE (");
        predicate.render(&mut sql);
        if !self.filter_values.is_empty() {
            sql.push_str(&format!(
                " AND c['{}'] IN ('{}')",
                self.filter_property,
                self.filter_values.join("', '")
            ));
        }
        sql.push(')');

        let parameters = vec![
            QueryParameter::new("@schemaName", self.schema_name),
            QueryParameter::new("@devicesProperty", self.devices_property),
            QueryParameter::new("@devices", strings(self.devices)),
            QueryParameter::new("@byIdProperty", optional(self.by_id_property)),
            QueryParameter::new("@byId", optional(self.by_id)),
            QueryParameter::new("@fromProperty", self.from_property),
            QueryParameter::new("@toProperty", self.to_property),
            QueryParameter::new("@filterProperty", self.filter_property),
            QueryParameter::new("@filterValues", strings(self.filter_values)),
        ];

        Ok(SqlQuerySpec::with_parameters(sql, parameters))
    }
}

/// Single document by id.
pub fn by_id_query(id: &str) -> Result<SqlQuerySpec> {
    validate_identifier(id)?;
    Ok(SqlQuerySpec::with_parameters(
        "SELECT * FROM c WHERE c.id = @id",
        vec![QueryParameter::new("@id", id)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    const RULE_ID: &str = "bef978d4-54f6-429f-bda5-db2494b833ef";
    const RECEIVED: &str = "device.msg.received";

    fn devices() -> Vec<String> {
        vec!["chiller-01.0".to_string(), "chiller-02.0".to_string()]
    }

    fn documents_query<'a>(
        devices: &'a [String],
        by_id: Option<&'a str>,
        by_id_property: Option<&'a str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DocumentsQuery<'a> {
        DocumentsQuery {
            schema_name: "alarm",
            by_id,
            by_id_property,
            from: Some(from),
            from_property: RECEIVED,
            to: Some(to),
            to_property: RECEIVED,
            order: Some("asc"),
            order_property: RECEIVED,
            skip: 0,
            limit: Some(100),
            devices,
            devices_property: "device.id",
        }
    }

    fn count_query<'a>(
        devices: &'a [String],
        by_id: Option<&'a str>,
        by_id_property: Option<&'a str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CountQuery<'a> {
        CountQuery {
            schema_name: "alarm",
            by_id,
            by_id_property,
            from: Some(from),
            from_property: RECEIVED,
            to: Some(to),
            to_property: RECEIVED,
            devices,
            devices_property: "device.id",
            filter_values: &["open", "acknowledged"],
            filter_property: "status",
        }
    }

    fn values(spec: &SqlQuerySpec) -> Vec<&Value> {
        spec.parameters.iter().map(|p| &p.value).collect()
    }

    #[test]
    fn test_documents_sql() {
        let to = Utc::now();
        let from = to - Duration::hours(1);
        let devices = devices();

        let spec = documents_query(&devices, Some(RULE_ID), Some("rule.id"), from, to)
            .build()
            .unwrap();

        assert_eq!(
            spec.query,
            format!(
                "SELECT TOP @top * FROM c WHERE (c[\"doc.schema\"] = @schemaName AND c['device.id'] IN ('chiller-01.0', 'chiller-02.0') AND c[@byIdProperty] = @byId AND c[@fromProperty] >= {} AND c[@toProperty] <= {}) ORDER BY c[@orderProperty] ASC",
                from.timestamp_millis(),
                to.timestamp_millis()
            )
        );
        assert_eq!(
            values(&spec),
            vec![
                &json!(100),
                &json!("alarm"),
                &json!("device.id"),
                &json!(["chiller-01.0", "chiller-02.0"]),
                &json!("rule.id"),
                &json!(RULE_ID),
                &json!(RECEIVED),
                &json!(RECEIVED),
                &json!(RECEIVED),
            ]
        );
    }

    #[test]
    fn test_documents_sql_without_by_id() {
        let to = Utc::now();
        let from = to - Duration::hours(1);
        let devices = devices();

        let spec = documents_query(&devices, None, None, from, to).build().unwrap();

        assert_eq!(
            spec.query,
            format!(
                "SELECT TOP @top * FROM c WHERE (c[\"doc.schema\"] = @schemaName AND c['device.id'] IN ('chiller-01.0', 'chiller-02.0') AND c[@fromProperty] >= {} AND c[@toProperty] <= {}) ORDER BY c[@orderProperty] ASC",
                from.timestamp_millis(),
                to.timestamp_millis()
            )
        );
        assert_eq!(spec.parameters[4].value, Value::Null);
        assert_eq!(spec.parameters[5].value, Value::Null);
        assert_eq!(spec.parameters[6].value, json!(RECEIVED));
    }

    #[test]
    fn test_documents_sql_rejects_quote_in_schema() {
        let to = Utc::now();
        let devices = devices();
        let mut query = documents_query(&devices, Some(RULE_ID), Some("rule.id"), to, to);
        query.schema_name = "alarm's";

        assert!(matches!(query.build(), Err(AlarmsError::InvalidInput(_))));
    }

    #[test]
    fn test_documents_sql_rejects_bad_device() {
        let to = Utc::now();
        let devices = vec!["chiller-01.0".to_string(), "x') OR 1=1 --".to_string()];

        let result = documents_query(&devices, None, None, to, to).build();
        assert!(matches!(result, Err(AlarmsError::InvalidInput(_))));
    }

    #[test]
    fn test_order_defaults_to_descending() {
        let now = Utc::now();
        let devices = devices();
        let mut query = documents_query(&devices, None, None, now, now);

        query.order = None;
        assert!(query.build().unwrap().query.ends_with("ORDER BY c[@orderProperty] DESC"));

        query.order = Some("ASC");
        assert!(query.build().unwrap().query.ends_with("ORDER BY c[@orderProperty] ASC"));

        query.order = Some("sideways");
        assert!(query.build().unwrap().query.ends_with("ORDER BY c[@orderProperty] DESC"));
    }

    #[test]
    fn test_unlimited_query_omits_top() {
        let now = Utc::now();
        let mut query = documents_query(&[], Some(RULE_ID), Some("rule.id"), now, now);
        query.limit = None;
        query.from = None;
        query.to = None;

        let spec = query.build().unwrap();
        assert_eq!(
            spec.query,
            "SELECT * FROM c WHERE (c[\"doc.schema\"] = @schemaName AND c[@byIdProperty] = @byId) ORDER BY c[@orderProperty] ASC"
        );
        assert!(spec.parameter("@top").is_none());
        assert_eq!(spec.parameters[0].name, "@schemaName");
    }

    #[test]
    fn test_top_includes_skip() {
        let now = Utc::now();
        let mut query = documents_query(&[], None, None, now, now);
        query.skip = 20;
        query.limit = Some(10);

        assert_eq!(query.build().unwrap().parameter("@top"), Some(&json!(30)));
    }

    #[test]
    fn test_count_sql() {
        let to = Utc::now();
        let from = to - Duration::hours(1);
        let devices = devices();

        let spec = count_query(&devices, Some(RULE_ID), Some("rule.id"), from, to)
            .build()
            .unwrap();

        assert_eq!(
            spec.query,
            format!(
                "SELECT VALUE COUNT(1) FROM c WHERE (c[\"doc.schema\"] = @schemaName AND c['device.id'] IN ('chiller-01.0', 'chiller-02.0') AND c[@byIdProperty] = @byId AND c[@fromProperty] >= {} AND c[@toProperty] <= {} AND c['status'] IN ('open', 'acknowledged'))",
                from.timestamp_millis(),
                to.timestamp_millis()
            )
        );
        assert_eq!(
            values(&spec),
            vec![
                &json!("alarm"),
                &json!("device.id"),
                &json!(["chiller-01.0", "chiller-02.0"]),
                &json!("rule.id"),
                &json!(RULE_ID),
                &json!(RECEIVED),
                &json!(RECEIVED),
                &json!("status"),
                &json!(["open", "acknowledged"]),
            ]
        );
    }

    #[test]
    fn test_count_sql_without_by_id() {
        let to = Utc::now();
        let from = to - Duration::hours(1);
        let devices = devices();

        let spec = count_query(&devices, None, None, from, to).build().unwrap();

        assert_eq!(
            spec.query,
            format!(
                "SELECT VALUE COUNT(1) FROM c WHERE (c[\"doc.schema\"] = @schemaName AND c['device.id'] IN ('chiller-01.0', 'chiller-02.0') AND c[@fromProperty] >= {} AND c[@toProperty] <= {} AND c['status'] IN ('open', 'acknowledged'))",
                from.timestamp_millis(),
                to.timestamp_millis()
            )
        );
        assert_eq!(spec.parameters[3].value, Value::Null);
        assert_eq!(spec.parameters[4].value, Value::Null);
    }

    #[test]
    fn test_count_sql_rejects_injected_rule_id() {
        let now = Utc::now();
        let devices = devices();

        let result = count_query(&devices, Some("'chiller-01' or 1=1"), Some("rule.id"), now, now).build();
        assert!(matches!(result, Err(AlarmsError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("").is_ok());
        assert!(validate_identifier("device.msg.received").is_ok());
        assert!(validate_identifier("a:b;c,d_e-f.0").is_ok());
        assert!(validate_identifier(" padded").is_err());
        assert!(validate_identifier("a\"b").is_err());
        assert!(validate_identifier("a]b").is_err());
        assert!(validate_identifier("caf\u{e9}").is_err());
    }

    #[test]
    fn test_by_id_query() {
        let spec = by_id_query("alarm-1").unwrap();
        assert_eq!(spec.query, "SELECT * FROM c WHERE c.id = @id");
        assert_eq!(spec.parameter("@id"), Some(&json!("alarm-1")));

        assert!(by_id_query("alarm-1' OR 1=1").is_err());
    }
}
