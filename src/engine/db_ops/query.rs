//! Parameterized SQL fragments for album-scoped, filtered, sorted, paginated reads.
//! Every caller-varying value is a bound `?` parameter; only fixed column names and keywords
//! are spliced into the SQL text.

use rusqlite::ParamsFromIter;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::engine::tools::normalize_album_path;
use crate::types::MediaType;

use super::ASSET_COLUMNS;

/// Which albums a query covers. `album_path: None` is the whole library.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumScope {
    pub album_path: Option<String>,
    pub include_subalbums: bool,
}

impl AlbumScope {
    pub fn library() -> Self {
        Self::default()
    }

    /// Exactly one album.
    pub fn album(path: impl AsRef<str>) -> Self {
        Self {
            album_path: Some(normalize_album_path(path.as_ref())),
            include_subalbums: false,
        }
    }

    /// An album and everything below it.
    pub fn subtree(path: impl AsRef<str>) -> Self {
        Self {
            album_path: Some(normalize_album_path(path.as_ref())),
            include_subalbums: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFilters {
    pub favorites_only: bool,
    /// Empty means every media type.
    pub media_types: Vec<MediaType>,
    /// Inclusive lower bound on capture time (seconds).
    pub captured_from: Option<i64>,
    /// Exclusive upper bound on capture time (seconds).
    pub captured_before: Option<i64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    CaptureTime,
    Filename,
    Size,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub key: SortKey,
    pub order: SortOrder,
}

impl Sort {
    pub fn new(key: SortKey, order: SortOrder) -> Self {
        Self { key, order }
    }

    /// `ORDER BY` body. Missing capture times go last in both directions; ties break on
    /// `relative_path` then `album_path` so pages never overlap.
    fn order_by(&self) -> String {
        let dir = self.order.keyword();
        let primary = match self.key {
            SortKey::CaptureTime => format!("(timestamp IS NULL) ASC, timestamp {dir}"),
            SortKey::Filename => format!("filename {dir}"),
            SortKey::Size => format!("size_bytes {dir}"),
        };
        format!("{primary}, relative_path ASC, album_path ASC")
    }
}

/// SQL text plus its positional parameters, in placeholder order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BuiltQuery {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Parameters in the form rusqlite's query methods take.
    pub fn bind(&self) -> ParamsFromIter<std::slice::Iter<'_, Value>> {
        rusqlite::params_from_iter(self.params.iter())
    }
}

/// Collects `AND`-joined conditions and their parameters.
#[derive(Default)]
struct Conditions {
    parts: Vec<String>,
    params: Vec<Value>,
}

impl Conditions {
    fn push(&mut self, sql: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.parts.push(sql.into());
        self.params.extend(params);
    }

    fn extend(&mut self, other: Conditions) {
        self.parts.extend(other.parts);
        self.params.extend(other.params);
    }

    fn into_query(self, prefix: &str) -> BuiltQuery {
        if self.parts.is_empty() {
            return BuiltQuery::default();
        }
        BuiltQuery {
            sql: format!("{prefix}{}", self.parts.join(" AND ")),
            params: self.params,
        }
    }
}

fn scope_conditions(scope: &AlbumScope) -> Conditions {
    let mut c = Conditions::default();
    let Some(raw) = scope.album_path.as_deref() else {
        return c;
    };
    let album = normalize_album_path(raw);
    match (album.is_empty(), scope.include_subalbums) {
        (true, true) => {}
        (_, false) => c.push("album_path = ?", [Value::Text(album)]),
        (false, true) => {
            // '0' is the byte after '/', so the range is exactly the paths under "album/".
            c.push(
                "(album_path = ? OR (album_path >= ? AND album_path < ?))",
                [
                    Value::Text(album.clone()),
                    Value::Text(format!("{album}/")),
                    Value::Text(format!("{album}0")),
                ],
            );
        }
    }
    c
}

fn filter_conditions(filters: &AssetFilters) -> Conditions {
    let mut c = Conditions::default();
    if filters.favorites_only {
        c.push("is_favorite = 1", Vec::<Value>::new());
    }
    if !filters.media_types.is_empty() {
        let marks = vec!["?"; filters.media_types.len()].join(", ");
        c.push(
            format!("media_type IN ({marks})"),
            filters
                .media_types
                .iter()
                .map(|m| Value::Text(m.as_str().to_string())),
        );
    }
    if let Some(from) = filters.captured_from {
        c.push("timestamp >= ?", [Value::Integer(from)]);
    }
    if let Some(before) = filters.captured_before {
        c.push("timestamp < ?", [Value::Integer(before)]);
    }
    c
}

/// Filter predicates only, `AND`-joined without a `WHERE`. Empty when nothing is filtered.
pub fn build_filter_clause(filters: &AssetFilters) -> BuiltQuery {
    filter_conditions(filters).into_query("")
}

/// `WHERE ...` for scope plus filters. Empty when the query covers every row.
pub fn build_where_clause(scope: &AlbumScope, filters: &AssetFilters) -> BuiltQuery {
    let mut c = scope_conditions(scope);
    c.extend(filter_conditions(filters));
    c.into_query("WHERE ")
}

/// One page of rows. `limit: None` means no limit.
pub fn build_pagination_query(
    scope: &AlbumScope,
    filters: &AssetFilters,
    sort: &Sort,
    limit: Option<u32>,
    offset: u64,
) -> BuiltQuery {
    let BuiltQuery { sql: where_sql, mut params } = build_where_clause(scope, filters);
    let sql = format!(
        "SELECT {ASSET_COLUMNS} FROM assets {where_sql} ORDER BY {} LIMIT ? OFFSET ?",
        sort.order_by()
    );
    params.push(Value::Integer(limit.map_or(-1, i64::from)));
    params.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
    BuiltQuery { sql, params }
}

/// Row count under the same `WHERE` as [`build_pagination_query`].
pub fn build_count_query(scope: &AlbumScope, filters: &AssetFilters) -> BuiltQuery {
    let BuiltQuery { sql: where_sql, params } = build_where_clause(scope, filters);
    BuiltQuery {
        sql: format!("SELECT COUNT(*) FROM assets {where_sql}")
            .trim_end()
            .to_string(),
        params,
    }
}
