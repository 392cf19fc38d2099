//! Per-user token usage, bucketed by day and model, for one project.
//!
//! The database does the heavy lifting (picking the page of users and
//! summing tokens per user, day and model); [`assemble`] folds the resulting
//! flat rows into the nested shape the public API returns.

use anyhow::Context;
use chrono::NaiveDate;
use utoipa::ToSchema;

use crate::data::{Storage, UsageRow};

pub const PAGE: IntConstraint = IntConstraint {
    name: "page",
    min: 1,
    max: u32::MAX,
    default: 1,
};

pub const LIMIT: IntConstraint = IntConstraint {
    name: "limit",
    min: 1,
    max: 100,
    default: 50,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidParam {
    #[error("{name}: Expected integer, received {raw:?}")]
    NotAnInteger { name: &'static str, raw: String },

    #[error("{name}: Number must be greater than or equal to {min}")]
    TooSmall { name: &'static str, min: u32 },

    #[error("{name}: Number must be less than or equal to {max}")]
    TooBig { name: &'static str, max: u32 },
}

/// Bounds and default for one integer query parameter.
#[derive(Debug, Clone, Copy)]
pub struct IntConstraint {
    pub name: &'static str,
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl IntConstraint {
    /// Absent means default. Present values must be integral numbers
    /// within bounds; `"2.0"` counts as `2`, `"2.5"` does not.
    pub fn parse(&self, raw: Option<&str>) -> Result<u32, InvalidParam> {
        let Some(raw) = raw else {
            return Ok(self.default);
        };
        let not_an_integer = || InvalidParam::NotAnInteger {
            name: self.name,
            raw: raw.to_string(),
        };
        let trimmed = raw.trim();
        let value: i128 = match trimmed.parse::<i128>() {
            Ok(n) => n,
            Err(_) => {
                let f: f64 = trimmed.parse().map_err(|_| not_an_integer())?;
                if !f.is_finite() || f.fract() != 0.0 {
                    return Err(not_an_integer());
                }
                // Saturating cast; only compared against bounds below.
                f as i128
            }
        };
        if value < i128::from(self.min) {
            return Err(InvalidParam::TooSmall {
                name: self.name,
                min: self.min,
            });
        }
        if value > i128::from(self.max) {
            return Err(InvalidParam::TooBig {
                name: self.name,
                max: self.max,
            });
        }
        u32::try_from(value).map_err(|_| not_an_integer())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: u32,
    pub limit: u32,
}

impl PageParams {
    pub fn parse(
        page: Option<&str>,
        limit: Option<&str>,
    ) -> Result<Self, InvalidParam> {
        Ok(Self {
            page: PAGE.parse(page)?,
            limit: LIMIT.parse(limit)?,
        })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserUsage {
    pub user_id: String,
    pub metrics: Vec<DailyUsage>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, ToSchema)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub usage: Vec<ModelUsage>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub model: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl ModelUsage {
    fn is_empty(&self) -> bool {
        self.prompt_tokens == 0
            && self.completion_tokens == 0
            && self.total_tokens == 0
    }
}

#[derive(Debug, Clone, serde::Serialize, ToSchema)]
#[aliases(UsersPage = Page<UserUsage>)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, params: PageParams, total_items: u64) -> Self {
        let PageParams { page, limit } = params;
        Self {
            data,
            meta: PageMeta {
                page,
                limit,
                total_items,
                total_pages: total_items.div_ceil(u64::from(limit.max(1))),
            },
        }
    }
}

fn tokens(user_id: &str, sum: Option<i64>) -> anyhow::Result<u64> {
    let sum = sum.unwrap_or(0);
    u64::try_from(sum)
        .with_context(|| format!("Negative token sum {sum} for {user_id:?}"))
}

/// Folds rows ordered by user, then day descending, into one entry per
/// user. A user row without a day is a user with no usage at all; triples
/// whose token sums are all zero are dropped, and a user left with nothing
/// keeps an empty `metrics`. A negative sum is an error.
pub fn assemble(rows: Vec<UsageRow>) -> anyhow::Result<Vec<UserUsage>> {
    let mut users: Vec<UserUsage> = Vec::new();
    for row in rows {
        if users.last().map_or(true, |u| u.user_id != row.user_id) {
            users.push(UserUsage {
                user_id: row.user_id.clone(),
                metrics: Vec::new(),
            });
        }
        let Some(day) = row.day.as_deref() else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") else {
            tracing::warn!(user_id = row.user_id, day, "Unparsable usage day.");
            continue;
        };
        let usage = ModelUsage {
            model: row.model,
            prompt_tokens: tokens(&row.user_id, row.prompt_tokens)?,
            completion_tokens: tokens(&row.user_id, row.completion_tokens)?,
            total_tokens: tokens(&row.user_id, row.total_tokens)?,
        };
        if usage.is_empty() {
            continue;
        }
        let Some(user) = users.last_mut() else {
            unreachable!("A user entry is pushed before its rows.");
        };
        match user.metrics.last_mut() {
            Some(daily) if daily.date == date => daily.usage.push(usage),
            _ => user.metrics.push(DailyUsage {
                date,
                usage: vec![usage],
            }),
        }
    }
    Ok(users)
}

/// One page of per-user usage plus the project's distinct user count.
///
/// The two reads run concurrently and outside any transaction, so under
/// concurrent ingestion the count and the page may disagree slightly.
#[tracing::instrument(skip(storage))]
pub async fn compute(
    storage: &Storage,
    project_id: &str,
    params: PageParams,
) -> anyhow::Result<(Vec<UserUsage>, u64)> {
    let (rows, total) = tokio::try_join!(
        storage.usage_rows(project_id, params.limit, params.offset()),
        storage.count_distinct_users(project_id),
    )?;
    tracing::debug!(rows = rows.len(), total, "Fetched usage.");
    Ok((assemble(rows)?, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        user_id: &str,
        day: Option<&str>,
        model: Option<&str>,
        tokens: (i64, i64, i64),
    ) -> UsageRow {
        UsageRow {
            user_id: user_id.to_string(),
            day: day.map(str::to_string),
            model: model.map(str::to_string),
            prompt_tokens: day.map(|_| tokens.0),
            completion_tokens: day.map(|_| tokens.1),
            total_tokens: day.map(|_| tokens.2),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn defaults_apply_when_absent() {
        assert_eq!(
            PageParams::parse(None, None),
            Ok(PageParams { page: 1, limit: 50 })
        );
    }

    #[test]
    fn bounds_are_enforced() {
        assert_eq!(
            LIMIT.parse(Some("101")),
            Err(InvalidParam::TooBig {
                name: "limit",
                max: 100
            })
        );
        assert_eq!(
            LIMIT.parse(Some("0")),
            Err(InvalidParam::TooSmall {
                name: "limit",
                min: 1
            })
        );
        assert_eq!(
            PAGE.parse(Some("0")),
            Err(InvalidParam::TooSmall {
                name: "page",
                min: 1
            })
        );
        assert_eq!(PAGE.parse(Some("-3")).unwrap_err().to_string(),
            "page: Number must be greater than or equal to 1");
        assert_eq!(LIMIT.parse(Some("100")), Ok(100));
        assert!(PAGE.parse(Some("99999999999999")).is_err());
    }

    #[test]
    fn only_integers_pass() {
        assert_eq!(PAGE.parse(Some("3")), Ok(3));
        assert_eq!(PAGE.parse(Some("3.0")), Ok(3));
        assert!(matches!(
            PAGE.parse(Some("2.5")),
            Err(InvalidParam::NotAnInteger { .. })
        ));
        assert!(matches!(
            LIMIT.parse(Some("ten")),
            Err(InvalidParam::NotAnInteger { .. })
        ));
        assert!(PAGE.parse(Some("")).is_err());
        assert!(PAGE.parse(Some("NaN")).is_err());
        assert_eq!(PAGE.parse(Some(" 2 ")), Ok(2));
        assert_eq!(LIMIT.parse(Some("\t7\n")), Ok(7));
    }

    #[test]
    fn offset_follows_page_and_limit() {
        assert_eq!(PageParams { page: 1, limit: 50 }.offset(), 0);
        assert_eq!(PageParams { page: 3, limit: 20 }.offset(), 40);
    }

    #[test]
    fn total_pages_rounds_up() {
        let params = PageParams { page: 1, limit: 50 };
        let meta = |total| Page::<()>::new(vec![], params, total).meta;
        assert_eq!(meta(0).total_pages, 0);
        assert_eq!(meta(1).total_pages, 1);
        assert_eq!(meta(50).total_pages, 1);
        assert_eq!(meta(51).total_pages, 2);
        assert_eq!(meta(51).total_items, 51);
    }

    #[test]
    fn users_without_usage_get_empty_metrics() {
        let users = assemble(vec![
            row("a", None, None, (0, 0, 0)),
            row("b", None, None, (0, 0, 0)),
        ])
        .unwrap();
        assert_eq!(
            users,
            vec![
                UserUsage {
                    user_id: "a".to_string(),
                    metrics: vec![]
                },
                UserUsage {
                    user_id: "b".to_string(),
                    metrics: vec![]
                },
            ]
        );
    }

    #[test]
    fn zero_triples_are_dropped() {
        let users = assemble(vec![
            row("a", Some("2024-03-02"), Some("gpt-4"), (0, 0, 0)),
            row("a", Some("2024-03-01"), Some("gpt-4"), (1, 0, 1)),
        ])
        .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].metrics.len(), 1);
        assert_eq!(users[0].metrics[0].date, date("2024-03-01"));
    }

    #[test]
    fn negative_sums_are_an_error() {
        let result = assemble(vec![row(
            "a",
            Some("2024-03-02"),
            Some("gpt-4"),
            (-50, 10, -40),
        )]);
        let error = result.unwrap_err();
        assert!(error.to_string().contains("Negative token sum -50"));
    }

    #[test]
    fn days_group_models() {
        let users = assemble(vec![
            row("a", Some("2024-03-02"), Some("claude"), (5, 5, 10)),
            row("a", Some("2024-03-02"), Some("gpt-4"), (1, 2, 3)),
            row("a", Some("2024-03-01"), Some("gpt-4"), (7, 0, 7)),
            row("b", Some("2024-03-01"), None, (0, 4, 4)),
        ])
        .unwrap();
        assert_eq!(users.len(), 2);
        let a = &users[0];
        assert_eq!(a.metrics.len(), 2);
        assert_eq!(a.metrics[0].date, date("2024-03-02"));
        let models: Vec<_> = a.metrics[0]
            .usage
            .iter()
            .map(|u| u.model.as_deref())
            .collect();
        assert_eq!(models, vec![Some("claude"), Some("gpt-4")]);
        assert_eq!(a.metrics[1].usage[0].prompt_tokens, 7);
        let b = &users[1];
        assert_eq!(b.metrics[0].usage[0].model, None);
        assert_eq!(b.metrics[0].usage[0].completion_tokens, 4);
    }

    #[test]
    fn serializes_in_camel_case() {
        let users = assemble(vec![row(
            "a",
            Some("2024-03-02"),
            Some("gpt-4"),
            (1, 2, 3),
        )])
        .unwrap();
        let page = Page::new(users, PageParams { page: 1, limit: 10 }, 1);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "data": [{
                    "userId": "a",
                    "metrics": [{
                        "date": "2024-03-02",
                        "usage": [{
                            "model": "gpt-4",
                            "promptTokens": 1,
                            "completionTokens": 2,
                            "totalTokens": 3
                        }]
                    }]
                }],
                "meta": {
                    "page": 1,
                    "limit": 10,
                    "totalItems": 1,
                    "totalPages": 1
                }
            })
        );
    }
}
