use photodex::engine::db_ops::{
    AlbumScope, AssetFilters, Handle, Sort, SortKey, SortOrder, build_count_query,
    build_filter_clause, build_pagination_query, build_where_clause, initialize_schema, rows,
};
use photodex::{AssetKey, AssetRow, MediaType};
use rusqlite::types::Value;

fn memory_store() -> Handle {
    let handle = Handle::open_in_memory().unwrap();
    initialize_schema(&handle).unwrap();
    handle
}

fn row(album: &str, rel: &str, size: u64, ts: Option<i64>) -> AssetRow {
    let mut r = AssetRow::new(AssetKey::new(album, rel), 1, size, MediaType::Photo);
    r.timestamp = ts;
    r
}

fn keys(found: &[AssetRow]) -> Vec<String> {
    found.iter().map(|r| r.key().to_string()).collect()
}

// --- clause building ---

#[test]
fn test_where_clause_library_scope_is_empty() {
    let q = build_where_clause(&AlbumScope::library(), &AssetFilters::default());
    assert!(q.is_empty());
    assert!(q.params.is_empty());
}

#[test]
fn test_where_clause_root_subtree_adds_nothing() {
    let q = build_where_clause(&AlbumScope::subtree(""), &AssetFilters::default());
    assert!(q.is_empty());
}

#[test]
fn test_where_clause_single_album() {
    let q = build_where_clause(&AlbumScope::album("/Trips/"), &AssetFilters::default());
    assert_eq!(q.sql, "WHERE album_path = ?");
    assert_eq!(q.params, vec![Value::Text("Trips".to_string())]);
}

#[test]
fn test_where_clause_subtree_range() {
    let q = build_where_clause(&AlbumScope::subtree("Trips"), &AssetFilters::default());
    assert_eq!(
        q.params,
        vec![
            Value::Text("Trips".to_string()),
            Value::Text("Trips/".to_string()),
            Value::Text("Trips0".to_string()),
        ]
    );
}

#[test]
fn test_filter_clause_binds_every_value() {
    let filters = AssetFilters {
        favorites_only: true,
        media_types: vec![MediaType::Photo, MediaType::LivePhoto],
        captured_from: Some(10),
        captured_before: Some(20),
    };
    let q = build_filter_clause(&filters);
    assert!(!q.sql.starts_with("WHERE"));
    assert!(q.sql.contains("is_favorite = 1"));
    assert!(q.sql.contains("media_type IN (?, ?)"));
    assert_eq!(q.params.len(), 4);
    assert_eq!(q.params[1], Value::Text("live_photo".to_string()));
}

#[test]
fn test_hostile_album_name_is_bound_not_spliced() {
    let album = "x'; DROP TABLE assets; --";
    let q = build_where_clause(&AlbumScope::album(album), &AssetFilters::default());
    assert!(!q.sql.contains("DROP"));

    let handle = memory_store();
    let conn = handle.conn().unwrap();
    rows::upsert(conn, handle.path(), &row(album, "a.jpg", 1, None)).unwrap();
    let page = build_pagination_query(
        &AlbumScope::album(album),
        &AssetFilters::default(),
        &Sort::default(),
        None,
        0,
    );
    let found = rows::fetch(conn, handle.path(), &page).unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn test_pagination_without_limit_binds_minus_one() {
    let q = build_pagination_query(
        &AlbumScope::library(),
        &AssetFilters::default(),
        &Sort::default(),
        None,
        5,
    );
    assert!(q.sql.ends_with("LIMIT ? OFFSET ?"));
    assert_eq!(q.params, vec![Value::Integer(-1), Value::Integer(5)]);
}

// --- executed against a store ---

#[test]
fn test_subtree_excludes_sibling_prefix() {
    let handle = memory_store();
    let conn = handle.conn().unwrap();
    rows::upsert_many(
        conn,
        handle.path(),
        &[
            row("Trips", "a.jpg", 1, None),
            row("Trips/2023", "b.jpg", 1, None),
            row("Trips2", "c.jpg", 1, None),
            row("Trips-old", "d.jpg", 1, None),
        ],
    )
    .unwrap();
    let q = build_pagination_query(
        &AlbumScope::subtree("Trips"),
        &AssetFilters::default(),
        &Sort::new(SortKey::Filename, SortOrder::Asc),
        None,
        0,
    );
    let found = rows::fetch(conn, handle.path(), &q).unwrap();
    assert_eq!(keys(&found), vec!["Trips/a.jpg", "Trips/2023/b.jpg"]);

    let count = build_count_query(&AlbumScope::subtree("Trips"), &AssetFilters::default());
    assert_eq!(rows::count(conn, handle.path(), &count).unwrap(), 2);
}

#[test]
fn test_capture_time_sort_puts_missing_last_both_ways() {
    let handle = memory_store();
    let conn = handle.conn().unwrap();
    rows::upsert_many(
        conn,
        handle.path(),
        &[
            row("A", "none.jpg", 1, None),
            row("A", "late.jpg", 1, Some(200)),
            row("A", "early.jpg", 1, Some(100)),
        ],
    )
    .unwrap();
    for (order, expected) in [
        (SortOrder::Asc, ["A/early.jpg", "A/late.jpg", "A/none.jpg"]),
        (SortOrder::Desc, ["A/late.jpg", "A/early.jpg", "A/none.jpg"]),
    ] {
        let q = build_pagination_query(
            &AlbumScope::library(),
            &AssetFilters::default(),
            &Sort::new(SortKey::CaptureTime, order),
            None,
            0,
        );
        let found = rows::fetch(conn, handle.path(), &q).unwrap();
        assert_eq!(keys(&found), expected);
    }
}

#[test]
fn test_pages_are_disjoint_and_cover_everything() {
    let handle = memory_store();
    let conn = handle.conn().unwrap();
    // Same size everywhere so every tie breaks on the key.
    let all: Vec<AssetRow> = (0..25)
        .map(|i| row(if i % 2 == 0 { "A" } else { "B" }, &format!("{:02}.jpg", i % 10), 7, None))
        .collect();
    rows::upsert_many(conn, handle.path(), &all).unwrap();
    let total = rows::count(
        conn,
        handle.path(),
        &build_count_query(&AlbumScope::library(), &AssetFilters::default()),
    )
    .unwrap();

    let mut seen = Vec::new();
    let mut offset = 0u64;
    loop {
        let q = build_pagination_query(
            &AlbumScope::library(),
            &AssetFilters::default(),
            &Sort::new(SortKey::Size, SortOrder::Desc),
            Some(4),
            offset,
        );
        let page = rows::fetch(conn, handle.path(), &q).unwrap();
        if page.is_empty() {
            break;
        }
        offset += page.len() as u64;
        seen.extend(keys(&page));
    }
    assert_eq!(seen.len() as u64, total);
    let mut dedup = seen.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(dedup.len(), seen.len());
}

#[test]
fn test_filters_narrow_results() {
    let handle = memory_store();
    let conn = handle.conn().unwrap();
    let mut fav = row("A", "fav.jpg", 1, Some(50));
    fav.is_favorite = true;
    let mut video = row("A", "clip.mov", 1, Some(50));
    video.media_type = MediaType::Video;
    rows::upsert_many(conn, handle.path(), &[fav, video, row("A", "old.jpg", 1, Some(5))]).unwrap();

    let count = |filters: AssetFilters| {
        rows::count(
            conn,
            handle.path(),
            &build_count_query(&AlbumScope::album("A"), &filters),
        )
        .unwrap()
    };
    assert_eq!(
        count(AssetFilters {
            favorites_only: true,
            ..Default::default()
        }),
        1
    );
    assert_eq!(
        count(AssetFilters {
            media_types: vec![MediaType::Video],
            ..Default::default()
        }),
        1
    );
    assert_eq!(
        count(AssetFilters {
            captured_from: Some(10),
            captured_before: Some(60),
            ..Default::default()
        }),
        2
    );
}
