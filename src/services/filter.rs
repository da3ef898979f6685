//! Translation of list query strings into typed filter conditions.
//!
//! `GET /devices?os=Android&createdAt[gte]=2024-01-01T00:00:00Z&mine` becomes
//! three conditions: an equality on `os`, a `>=` comparison on `created_at`
//! and an ownership condition on `user_id`. Operators are only recognised as
//! a bracketed suffix of the key; values are never inspected for operator
//! names, so `os=gte30` is a plain equality.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Query keys that steer the list endpoint and never become filters.
pub const RESERVED_PARAMS: [&str; 7] = [
    "select",
    "page",
    "limit",
    "sort",
    "populate",
    "mine",
    "checkedout",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Uuid,
    Timestamp,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Name as it appears in JSON and in the query string.
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    const fn new(name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self { name, column, kind }
    }

    /// Binary payloads can be selected but not compared or ordered.
    pub fn is_comparable(&self) -> bool {
        self.kind != FieldKind::Binary
    }
}

const DEVICE_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("id", "id", FieldKind::Uuid),
    FieldSpec::new("user", "user_id", FieldKind::Uuid),
    FieldSpec::new("device", "device", FieldKind::Text),
    FieldSpec::new("os", "os", FieldKind::Text),
    FieldSpec::new("manufacturer", "manufacturer", FieldKind::Text),
    FieldSpec::new("image", "image_data", FieldKind::Binary),
    FieldSpec::new("isCheckedout", "is_checkedout", FieldKind::Bool),
    FieldSpec::new("lastCheckedoutDate", "last_checkedout_date", FieldKind::Timestamp),
    FieldSpec::new("lastCheckedoutBy", "last_checkedout_by", FieldKind::Uuid),
    FieldSpec::new("createdAt", "created_at", FieldKind::Timestamp),
];

const USER_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("id", "id", FieldKind::Uuid),
    FieldSpec::new("userName", "user_name", FieldKind::Text),
    FieldSpec::new("email", "email", FieldKind::Text),
    FieldSpec::new("checkedout", "checkedout", FieldKind::Uuid),
    FieldSpec::new("createdAt", "created_at", FieldKind::Timestamp),
];

/// Entity-type tag for a list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Devices,
    Users,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Devices => "devices",
            EntityKind::Users => "users",
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            EntityKind::Devices => DEVICE_FIELDS,
            EntityKind::Users => USER_FIELDS,
        }
    }

    pub fn field(&self, name: &str) -> AppResult<&'static FieldSpec> {
        self.fields()
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown field {}", name)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl FilterOperator {
    /// Case-sensitive, whole-token match.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "eq" => Some(Self::Eq),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Bool(bool),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    List(Vec<FilterValue>),
}

impl FilterValue {
    fn parse(spec: &FieldSpec, raw: &str) -> AppResult<Self> {
        let invalid = || AppError::BadRequest(format!("Invalid value {} for {}", raw, spec.name));

        match spec.kind {
            FieldKind::Text => Ok(Self::Text(raw.to_string())),
            FieldKind::Bool => raw.parse().map(Self::Bool).map_err(|_| invalid()),
            FieldKind::Uuid => Uuid::parse_str(raw).map(Self::Uuid).map_err(|_| invalid()),
            FieldKind::Timestamp => DateTime::parse_from_rfc3339(raw)
                .map(|ts| Self::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|_| invalid()),
            FieldKind::Binary => Err(AppError::BadRequest(format!(
                "Cannot filter on {}",
                spec.name
            ))),
        }
    }

    fn push_bind(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Text(v) => {
                builder.push_bind(v.clone());
            }
            Self::Bool(v) => {
                builder.push_bind(*v);
            }
            Self::Uuid(v) => {
                builder.push_bind(*v);
            }
            Self::Timestamp(v) => {
                builder.push_bind(*v);
            }
            Self::List(values) => {
                builder.push("(");
                let mut separated = builder.separated(", ");
                for value in values {
                    match value {
                        Self::Text(v) => separated.push_bind(v.clone()),
                        Self::Bool(v) => separated.push_bind(*v),
                        Self::Uuid(v) => separated.push_bind(*v),
                        Self::Timestamp(v) => separated.push_bind(*v),
                        // parse never nests lists
                        Self::List(_) => separated.push("NULL"),
                    };
                }
                separated.push_unseparated(")");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub field: &'static str,
    pub column: &'static str,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl FilterCondition {
    fn new(spec: &FieldSpec, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: spec.name,
            column: spec.column,
            operator,
            value,
        }
    }
}

/// Conjunction of conditions; empty means "match everything".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<FilterCondition>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn find(&self, field: &str) -> Option<&FilterCondition> {
        self.conditions.iter().find(|c| c.field == field)
    }

    /// Appends ` WHERE ...` (or nothing) to the builder.
    pub fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        for (i, condition) in self.conditions.iter().enumerate() {
            builder.push(if i == 0 { " WHERE " } else { " AND " });
            builder.push(condition.column);
            builder.push(" ");
            builder.push(condition.operator.as_sql());
            builder.push(" ");
            condition.value.push_bind(builder);
        }
    }
}

/// Raw query-string pairs in request order.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Splits `field[op]` into its parts. A bare key is an equality.
fn split_key(key: &str) -> AppResult<(&str, FilterOperator)> {
    match key.find('[') {
        Some(open) if key.ends_with(']') => {
            let field = &key[..open];
            let token = &key[open + 1..key.len() - 1];
            let operator = FilterOperator::parse(token).ok_or_else(|| {
                AppError::BadRequest(format!("Unsupported operator {} for {}", token, field))
            })?;
            Ok((field, operator))
        }
        _ => Ok((key, FilterOperator::Eq)),
    }
}

/// Builds the filter for a list request made by `caller`.
pub fn build_filter(params: &QueryParams, entity: EntityKind, caller: Uuid) -> AppResult<Filter> {
    let mut filter = Filter::default();

    for (key, raw) in params.iter() {
        if RESERVED_PARAMS.contains(&key) {
            continue;
        }

        let (name, operator) = split_key(key)?;
        let spec = entity.field(name)?;

        let value = match operator {
            FilterOperator::In => FilterValue::List(
                raw.split(',')
                    .map(|item| FilterValue::parse(spec, item.trim()))
                    .collect::<AppResult<Vec<_>>>()?,
            ),
            _ => FilterValue::parse(spec, raw)?,
        };

        filter
            .conditions
            .push(FilterCondition::new(spec, operator, value));
    }

    if entity == EntityKind::Devices {
        if params.contains("mine") {
            let spec = entity.field("user")?;
            filter.conditions.push(FilterCondition::new(
                spec,
                FilterOperator::Eq,
                FilterValue::Uuid(caller),
            ));
        }

        if let Some(checkedout) = params.get("checkedout") {
            let spec = entity.field("isCheckedout")?;
            filter.conditions.push(FilterCondition::new(
                spec,
                FilterOperator::Eq,
                FilterValue::Bool(checkedout == "true"),
            ));
        }
    }

    tracing::debug!(entity = entity.table(), ?filter, "constructed list filter");

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().copied().collect()
    }

    #[test]
    fn reserved_keys_never_become_conditions() {
        let caller = Uuid::new_v4();
        let query = params(&[
            ("select", "device,os"),
            ("page", "2"),
            ("limit", "5"),
            ("sort", "-createdAt"),
            ("populate", "false"),
        ]);

        let filter = build_filter(&query, EntityKind::Devices, caller).unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn operator_tokens_inside_values_are_left_alone() {
        let filter =
            build_filter(&params(&[("os", "gte30")]), EntityKind::Devices, Uuid::new_v4()).unwrap();

        assert_eq!(
            filter.conditions,
            vec![FilterCondition {
                field: "os",
                column: "os",
                operator: FilterOperator::Eq,
                value: FilterValue::Text("gte30".to_string()),
            }]
        );
    }

    #[test]
    fn bracketed_operator_becomes_typed_comparison() {
        let filter = build_filter(
            &params(&[("createdAt[gte]", "2024-01-01T00:00:00Z")]),
            EntityKind::Devices,
            Uuid::new_v4(),
        )
        .unwrap();

        let condition = filter.find("createdAt").unwrap();
        assert_eq!(condition.column, "created_at");
        assert_eq!(condition.operator, FilterOperator::Gte);
        assert!(matches!(condition.value, FilterValue::Timestamp(_)));
    }

    #[test]
    fn in_operator_takes_a_comma_separated_list() {
        let filter = build_filter(
            &params(&[("os[in]", "iOS 17, Android 14")]),
            EntityKind::Devices,
            Uuid::new_v4(),
        )
        .unwrap();

        assert_eq!(
            filter.find("os").unwrap().value,
            FilterValue::List(vec![
                FilterValue::Text("iOS 17".to_string()),
                FilterValue::Text("Android 14".to_string()),
            ])
        );
    }

    #[test]
    fn operators_are_case_sensitive() {
        let result = build_filter(
            &params(&[("createdAt[GTE]", "2024-01-01T00:00:00Z")]),
            EntityKind::Devices,
            Uuid::new_v4(),
        );
        assert_err!(result);
    }

    #[test]
    fn unknown_fields_and_bad_values_are_rejected() {
        let caller = Uuid::new_v4();
        assert_err!(build_filter(&params(&[("colour", "red")]), EntityKind::Devices, caller));
        assert_err!(build_filter(&params(&[("isCheckedout", "maybe")]), EntityKind::Devices, caller));
        assert_err!(build_filter(&params(&[("image", "abc")]), EntityKind::Devices, caller));
    }

    #[test]
    fn mine_scopes_devices_to_the_caller() {
        let caller = Uuid::new_v4();
        let filter = build_filter(&params(&[("mine", "")]), EntityKind::Devices, caller).unwrap();

        let condition = filter.find("user").unwrap();
        assert_eq!(condition.column, "user_id");
        assert_eq!(condition.value, FilterValue::Uuid(caller));
    }

    #[test]
    fn checkedout_is_true_only_for_the_literal_true() {
        let caller = Uuid::new_v4();

        let yes = build_filter(&params(&[("checkedout", "true")]), EntityKind::Devices, caller)
            .unwrap();
        assert_eq!(yes.find("isCheckedout").unwrap().value, FilterValue::Bool(true));

        for other in ["", "TRUE", "1", "yes"] {
            let no = build_filter(&params(&[("checkedout", other)]), EntityKind::Devices, caller)
                .unwrap();
            assert_eq!(no.find("isCheckedout").unwrap().value, FilterValue::Bool(false));
        }
    }

    #[test]
    fn device_only_shortcuts_are_ignored_for_users() {
        let filter = build_filter(
            &params(&[("mine", ""), ("checkedout", "true")]),
            EntityKind::Users,
            Uuid::new_v4(),
        )
        .unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn renders_parameterised_where_clause() {
        let filter = build_filter(
            &params(&[("os", "iOS"), ("createdAt[lt]", "2024-06-01T00:00:00Z"), ("device[in]", "a,b")]),
            EntityKind::Devices,
            Uuid::new_v4(),
        )
        .unwrap();

        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM devices");
        filter.push_where(&mut builder);

        assert_eq!(
            builder.sql(),
            "SELECT * FROM devices WHERE os = $1 AND created_at < $2 AND device IN ($3, $4)"
        );
    }
}
