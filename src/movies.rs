use crate::db::{now_ms, OptionalRowExt};
use crate::Result;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieRow {
    pub id: i64,
    pub watchmode_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub original_title: Option<String>,
    pub normalized_title: Option<String>,
    pub year: Option<String>,
    pub popularity: Option<f64>,
    pub has_video: bool,
}

const MOVIE_COLUMNS: &str =
    "id, watchmode_id, tmdb_id, original_title, normalized_title, year, popularity, has_video";

fn map_movie(row: &Row<'_>) -> rusqlite::Result<MovieRow> {
    let has_video: i64 = row.get(7)?;
    Ok(MovieRow {
        id: row.get(0)?,
        watchmode_id: row.get(1)?,
        tmdb_id: row.get(2)?,
        original_title: row.get(3)?,
        normalized_title: row.get(4)?,
        year: row.get(5)?,
        popularity: row.get(6)?,
        has_video: has_video != 0,
    })
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<MovieRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {MOVIE_COLUMNS} FROM movie WHERE id=?1"),
            [id],
            |row| map_movie(row),
        )
        .optional()?;
    Ok(row)
}

pub fn get_by_watchmode_id(conn: &Connection, watchmode_id: &str) -> Result<Option<MovieRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {MOVIE_COLUMNS} FROM movie WHERE watchmode_id=?1"),
            [watchmode_id],
            |row| map_movie(row),
        )
        .optional()?;
    Ok(row)
}

pub fn get_by_tmdb_id(conn: &Connection, tmdb_id: &str) -> Result<Option<MovieRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {MOVIE_COLUMNS} FROM movie WHERE tmdb_id=?1"),
            [tmdb_id],
            |row| map_movie(row),
        )
        .optional()?;
    Ok(row)
}

pub fn get_all(conn: &Connection) -> Result<Vec<MovieRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MOVIE_COLUMNS} FROM movie ORDER BY normalized_title"
    ))?;
    let rows = stmt
        .query_map([], |row| map_movie(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn search_by_title(conn: &Connection, term: &str) -> Result<Vec<MovieRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MOVIE_COLUMNS} FROM movie WHERE normalized_title LIKE ?1 ORDER BY normalized_title"
    ))?;
    let pattern = format!("%{}%", normalize_title(term));
    let rows = stmt
        .query_map([pattern], |row| map_movie(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// A non-blank title already on the row wins; an incoming title only backfills
/// a missing or blank one. The normalized search form follows the same rule.
fn merged_title(existing: &MovieRow, incoming: &str) -> (Option<String>, Option<String>) {
    match existing.original_title.as_deref() {
        Some(current) if !current.trim().is_empty() => (
            existing.original_title.clone(),
            existing.normalized_title.clone(),
        ),
        _ => (
            Some(incoming.to_string()),
            Some(normalize_title(incoming)),
        ),
    }
}

pub fn upsert_from_watchmode(
    conn: &Connection,
    watchmode_id: &str,
    tmdb_id: &str,
    title: &str,
    year: Option<&str>,
) -> Result<i64> {
    if let Some(existing) = get_by_watchmode_id(conn, watchmode_id)? {
        let (original_title, normalized_title) = merged_title(&existing, title);
        conn.execute(
            "UPDATE movie SET tmdb_id=?1, original_title=?2, normalized_title=?3, year=?4 WHERE id=?5",
            params![tmdb_id, original_title, normalized_title, year, existing.id],
        )?;
        return Ok(existing.id);
    }

    conn.execute(
        "INSERT INTO movie (watchmode_id, tmdb_id, original_title, normalized_title, year, popularity, has_video, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, 0, ?6)",
        params![
            watchmode_id,
            tmdb_id,
            title,
            normalize_title(title),
            year,
            now_ms()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn upsert_from_tmdb(
    conn: &Connection,
    tmdb_id: &str,
    title: &str,
    popularity: Option<f64>,
    has_video: bool,
) -> Result<i64> {
    if let Some(existing) = get_by_tmdb_id(conn, tmdb_id)? {
        let (original_title, normalized_title) = merged_title(&existing, title);
        conn.execute(
            "UPDATE movie SET original_title=?1, normalized_title=?2, popularity=?3, has_video=?4 WHERE id=?5",
            params![
                original_title,
                normalized_title,
                popularity,
                has_video as i64,
                existing.id
            ],
        )?;
        return Ok(existing.id);
    }

    conn.execute(
        "INSERT INTO movie (watchmode_id, tmdb_id, original_title, normalized_title, year, popularity, has_video, created_at_ms)
         VALUES (NULL, ?1, ?2, ?3, NULL, ?4, ?5, ?6)",
        params![
            tmdb_id,
            title,
            normalize_title(title),
            popularity,
            has_video as i64,
            now_ms()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Canonical decomposition with combining marks stripped, plus typographic
/// quote/dash folding. Idempotent.
pub fn normalize_title(title: &str) -> String {
    title
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{2013}' | '\u{2014}' | '\u{2015}' => '-',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn normalize_title_strips_accents_and_folds_punctuation() {
        assert_eq!(
            normalize_title("\u{201C}Caf\u{E9} Society\u{201D}"),
            "\"Cafe Society\""
        );
        assert_eq!(normalize_title("Am\u{E9}lie"), "Amelie");
        assert_eq!(
            normalize_title("L\u{E9}on \u{2013} The \u{2018}Professional\u{2019}"),
            "Leon - The 'Professional'"
        );
    }

    #[test]
    fn normalize_title_is_idempotent() {
        for input in [
            "\u{201C}Caf\u{E9} Society\u{201D}",
            "Am\u{E9}lie",
            "L\u{E9}on \u{2013} The \u{2018}Professional\u{2019}",
            "plain ascii",
            "",
        ] {
            let once = normalize_title(input);
            assert_eq!(normalize_title(&once), once);
        }
    }

    #[test]
    fn upsert_from_watchmode_is_idempotent() {
        let conn = db::open_in_memory().expect("db");

        let first =
            upsert_from_watchmode(&conn, "w1", "t1", "Midnight", Some("1999")).expect("upsert");
        let second =
            upsert_from_watchmode(&conn, "w1", "t1", "Midnight", Some("1999")).expect("upsert");
        assert_eq!(first, second);

        let all = get_all(&conn).expect("all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].original_title.as_deref(), Some("Midnight"));
        assert_eq!(all[0].year.as_deref(), Some("1999"));
    }

    #[test]
    fn existing_blank_title_is_backfilled() {
        let conn = db::open_in_memory().expect("db");

        upsert_from_watchmode(&conn, "w1", "t1", "  ", None).expect("blank upsert");
        let id = upsert_from_watchmode(&conn, "w1", "t1", "Midnight", None).expect("backfill");

        let movie = get_by_id(&conn, id).expect("get").expect("row");
        assert_eq!(movie.original_title.as_deref(), Some("Midnight"));
        assert_eq!(movie.normalized_title.as_deref(), Some("Midnight"));
    }

    #[test]
    fn existing_title_is_not_overwritten() {
        let conn = db::open_in_memory().expect("db");

        upsert_from_watchmode(&conn, "w1", "t1", "Original Title", None).expect("first");
        upsert_from_watchmode(&conn, "w1", "t1", "Different Title", None).expect("second");

        let movie = get_by_watchmode_id(&conn, "w1").expect("get").expect("row");
        assert_eq!(movie.original_title.as_deref(), Some("Original Title"));
    }

    #[test]
    fn tmdb_upsert_preserves_watchmode_cross_reference() {
        let conn = db::open_in_memory().expect("db");

        let id = upsert_from_watchmode(&conn, "w1", "t1", "Amelie", Some("2001")).expect("wm");
        let same = upsert_from_tmdb(&conn, "t1", "Am\u{E9}lie", Some(8.4), true).expect("tmdb");
        assert_eq!(id, same);

        let movie = get_by_id(&conn, id).expect("get").expect("row");
        assert_eq!(movie.watchmode_id.as_deref(), Some("w1"));
        assert_eq!(movie.year.as_deref(), Some("2001"));
        assert_eq!(movie.popularity, Some(8.4));
        assert!(movie.has_video);
        // Title came from the earlier pass; the TMDB pass must not replace it.
        assert_eq!(movie.original_title.as_deref(), Some("Amelie"));
    }

    #[test]
    fn absent_year_is_stored_as_null_not_empty() {
        let conn = db::open_in_memory().expect("db");

        upsert_from_watchmode(&conn, "w1", "t1", "No Year", None).expect("null year");
        upsert_from_watchmode(&conn, "w2", "t2", "Zero Year", Some("0")).expect("zero year");

        let no_year = get_by_watchmode_id(&conn, "w1").expect("get").expect("row");
        let zero_year = get_by_watchmode_id(&conn, "w2").expect("get").expect("row");
        assert!(no_year.year.is_none());
        assert_eq!(zero_year.year.as_deref(), Some("0"));
    }

    #[test]
    fn search_matches_normalized_form() {
        let conn = db::open_in_memory().expect("db");

        upsert_from_tmdb(&conn, "t1", "Am\u{E9}lie", None, false).expect("upsert");
        let hits = search_by_title(&conn, "amelie".to_uppercase().as_str()).expect("search");
        // LIKE is case-insensitive for ASCII in SQLite.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tmdb_id.as_deref(), Some("t1"));
    }
}
