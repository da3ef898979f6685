//! Reusable list retrieval: filter, count, expand, project, sort and paginate.
//!
//! Each list route is described by a [`ListEndpoint`]; the datastore side is
//! anything implementing [`ListSource`]. The result is an
//! [`AdvancedResults`] envelope that the route handler serialises as-is.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::filter::{build_filter, EntityKind, Filter, QueryParams};
use super::pagination::{PageRequest, Pagination};

/// Related entities a list endpoint may expand in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Populate {
    /// Replace a device's `user` id with the owner's summary.
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEndpoint {
    pub entity: EntityKind,
    pub populate: Option<Populate>,
}

impl ListEndpoint {
    pub const fn devices() -> Self {
        Self {
            entity: EntityKind::Devices,
            populate: Some(Populate::Owner),
        }
    }

    pub const fn users() -> Self {
        Self {
            entity: EntityKind::Users,
            populate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: &'static str,
    pub direction: SortDirection,
}

/// Parses `sort=field,-other`. Absent or empty sorts newest first.
pub fn parse_sort(raw: Option<&str>, entity: EntityKind) -> AppResult<Vec<SortKey>> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("-createdAt");

    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let (name, direction) = match token.strip_prefix('-') {
                Some(name) => (name, SortDirection::Descending),
                None => (token, SortDirection::Ascending),
            };
            let spec = entity.field(name)?;
            if !spec.is_comparable() {
                return Err(AppError::BadRequest(format!("Cannot sort on {}", name)));
            }
            Ok(SortKey {
                column: spec.column,
                direction,
            })
        })
        .collect()
}

pub fn push_order_by(keys: &[SortKey], builder: &mut QueryBuilder<'_, Postgres>) {
    for (i, key) in keys.iter().enumerate() {
        builder.push(if i == 0 { " ORDER BY " } else { ", " });
        builder.push(key.column);
        builder.push(match key.direction {
            SortDirection::Ascending => " ASC",
            SortDirection::Descending => " DESC",
        });
    }
}

/// Parses `select=field,other` into JSON field names.
pub fn parse_select(raw: Option<&str>, entity: EntityKind) -> AppResult<Option<Vec<&'static str>>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| entity.field(token).map(|spec| spec.name))
        .collect::<AppResult<Vec<_>>>()
        .map(Some)
}

/// Keeps `id` plus the selected fields of every row.
fn project(rows: &mut [Value], fields: &[&str]) {
    for row in rows {
        if let Value::Object(map) = row {
            map.retain(|key, _| key == "id" || fields.contains(&key.as_str()));
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListQuery<'a> {
    pub filter: &'a Filter,
    pub sort: &'a [SortKey],
    pub skip: u64,
    pub limit: Option<u64>,
    pub populate: Option<Populate>,
}

/// Datastore side of a list endpoint.
#[async_trait]
pub trait ListSource: Send + Sync {
    /// Number of rows matching `filter`, ignoring any window.
    async fn count(&self, filter: &Filter) -> AppResult<u64>;

    /// One window of matching rows, serialised, with relations expanded.
    async fn fetch(&self, query: ListQuery<'_>) -> AppResult<Vec<Value>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvancedResults {
    pub success: bool,
    pub count: u64,
    pub pagination: Pagination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub error: bool,
}

pub async fn advanced_results(
    source: &dyn ListSource,
    endpoint: ListEndpoint,
    params: &QueryParams,
    caller: Uuid,
) -> AppResult<AdvancedResults> {
    let filter = build_filter(params, endpoint.entity, caller)?;
    let sort = parse_sort(params.get("sort"), endpoint.entity)?;
    let select = parse_select(params.get("select"), endpoint.entity)?;
    let page = PageRequest::from_params(params.get("page"), params.get("limit"));

    let total = source.count(&filter).await?;
    tracing::debug!(entity = endpoint.entity.table(), total, "results before pagination");

    if total == 0 {
        return Err(AppError::NotFound(
            "No results found for the current filter".to_string(),
        ));
    }

    let populate = endpoint.populate.filter(|_| match params.get("populate") {
        None => true,
        Some(flag) => flag == "true",
    });

    let mut rows = source
        .fetch(ListQuery {
            filter: &filter,
            sort: &sort,
            skip: page.skip(),
            limit: page.limit(),
            populate,
        })
        .await?;
    tracing::debug!(
        entity = endpoint.entity.table(),
        returned = rows.len(),
        "results after pagination"
    );

    if let Some(fields) = &select {
        project(&mut rows, fields);
    }

    let pagination = page.pagination(total);

    if rows.is_empty() {
        return Ok(AdvancedResults {
            success: true,
            count: total,
            pagination,
            data: None,
            message: Some("No results for current filters".to_string()),
            error: false,
        });
    }

    Ok(AdvancedResults {
        success: true,
        count: total,
        pagination,
        data: Some(rows),
        message: None,
        error: false,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tokio_test::assert_err;

    use super::*;
    use crate::services::filter::FilterValue;

    #[derive(Debug, Clone)]
    struct Seen {
        filter: Filter,
        sort: Vec<SortKey>,
        skip: u64,
        limit: Option<u64>,
        populate: Option<Populate>,
    }

    /// Ignores the filter; serves `rows` through the requested window.
    struct MemorySource {
        rows: Vec<Value>,
        seen: Mutex<Option<Seen>>,
    }

    impl MemorySource {
        fn with_rows(n: usize) -> Self {
            let rows = (0..n)
                .map(|i| {
                    json!({
                        "id": format!("id-{i}"),
                        "device": format!("Device {i}"),
                        "os": "Android",
                        "user": "owner",
                    })
                })
                .collect();
            Self {
                rows,
                seen: Mutex::new(None),
            }
        }

        fn seen(&self) -> Seen {
            self.seen.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl ListSource for MemorySource {
        async fn count(&self, _filter: &Filter) -> AppResult<u64> {
            Ok(self.rows.len() as u64)
        }

        async fn fetch(&self, query: ListQuery<'_>) -> AppResult<Vec<Value>> {
            *self.seen.lock().unwrap() = Some(Seen {
                filter: query.filter.clone(),
                sort: query.sort.to_vec(),
                skip: query.skip,
                limit: query.limit,
                populate: query.populate,
            });

            let window = self.rows.iter().skip(query.skip as usize);
            Ok(match query.limit {
                Some(limit) => window.take(limit as usize).cloned().collect(),
                None => window.cloned().collect(),
            })
        }
    }

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn zero_matches_is_not_found() {
        let source = MemorySource::with_rows(0);
        let result = advanced_results(
            &source,
            ListEndpoint::devices(),
            &QueryParams::default(),
            Uuid::new_v4(),
        )
        .await;

        match result {
            Err(AppError::NotFound(msg)) => {
                assert_eq!(msg, "No results found for the current filter")
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn last_page_of_twenty_five() {
        let source = MemorySource::with_rows(25);
        let results = advanced_results(
            &source,
            ListEndpoint::devices(),
            &params(&[("page", "3")]),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        assert_eq!(results.count, 25);
        assert_eq!(results.pagination.prev, Some(2));
        assert_eq!(results.pagination.next, None);
        assert_eq!(results.data.unwrap().len(), 5);
        assert_eq!(source.seen().skip, 20);
    }

    #[tokio::test]
    async fn page_past_the_end_returns_message_instead_of_data() {
        let source = MemorySource::with_rows(25);
        let results = advanced_results(
            &source,
            ListEndpoint::devices(),
            &params(&[("page", "4")]),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        assert!(results.success);
        assert_eq!(results.count, 25);
        assert!(results.data.is_none());
        assert_eq!(results.message.as_deref(), Some("No results for current filters"));

        let body = serde_json::to_value(&results).unwrap();
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn limit_all_returns_everything() {
        let source = MemorySource::with_rows(25);
        let results = advanced_results(
            &source,
            ListEndpoint::devices(),
            &params(&[("limit", "all")]),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        assert_eq!(results.data.unwrap().len(), 25);
        assert_eq!(results.pagination, Pagination::default());
        assert_eq!(source.seen().limit, None);
    }

    #[tokio::test]
    async fn select_keeps_only_requested_fields_and_id() {
        let source = MemorySource::with_rows(3);
        let results = advanced_results(
            &source,
            ListEndpoint::devices(),
            &params(&[("select", "device")]),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        for row in results.data.unwrap() {
            let keys: Vec<_> = row.as_object().unwrap().keys().cloned().collect();
            assert_eq!(keys.len(), 2);
            assert!(row.get("id").is_some());
            assert!(row.get("device").is_some());
        }
    }

    #[tokio::test]
    async fn default_sort_is_newest_first() {
        let source = MemorySource::with_rows(1);
        advanced_results(
            &source,
            ListEndpoint::devices(),
            &QueryParams::default(),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        assert_eq!(
            source.seen().sort,
            vec![SortKey {
                column: "created_at",
                direction: SortDirection::Descending
            }]
        );
    }

    #[tokio::test]
    async fn populate_defaults_on_and_can_be_switched_off() {
        let source = MemorySource::with_rows(1);
        let caller = Uuid::new_v4();

        advanced_results(&source, ListEndpoint::devices(), &QueryParams::default(), caller)
            .await
            .unwrap();
        assert_eq!(source.seen().populate, Some(Populate::Owner));

        advanced_results(
            &source,
            ListEndpoint::devices(),
            &params(&[("populate", "false")]),
            caller,
        )
        .await
        .unwrap();
        assert_eq!(source.seen().populate, None);

        advanced_results(&source, ListEndpoint::users(), &QueryParams::default(), caller)
            .await
            .unwrap();
        assert_eq!(source.seen().populate, None);
    }

    #[tokio::test]
    async fn mine_reaches_the_source_as_an_owner_condition() {
        let source = MemorySource::with_rows(2);
        let caller = Uuid::new_v4();

        advanced_results(&source, ListEndpoint::devices(), &params(&[("mine", "")]), caller)
            .await
            .unwrap();

        let seen = source.seen();
        assert_eq!(seen.filter.find("user").unwrap().value, FilterValue::Uuid(caller));
    }

    #[tokio::test]
    async fn unknown_sort_field_is_rejected_before_querying() {
        let source = MemorySource::with_rows(2);
        let result = advanced_results(
            &source,
            ListEndpoint::devices(),
            &params(&[("sort", "-colour")]),
            Uuid::new_v4(),
        )
        .await;

        assert_err!(result);
        assert!(source.seen.lock().unwrap().is_none());
    }

    #[test]
    fn renders_order_by() {
        let keys = parse_sort(Some("os,-device"), EntityKind::Devices).unwrap();
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM devices");
        push_order_by(&keys, &mut builder);

        assert_eq!(builder.sql(), "SELECT * FROM devices ORDER BY os ASC, device DESC");
    }

    #[test]
    fn binary_fields_cannot_be_sorted() {
        assert_err!(parse_sort(Some("image"), EntityKind::Devices));
    }
}
