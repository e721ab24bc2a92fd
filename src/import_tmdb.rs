use crate::db::{self, now_ms};
use crate::jobs::{BackgroundJob, TaskContext};
use crate::lines::process_lines;
use crate::movies;
use crate::paths::AppPaths;
use crate::transfer::{download_to_file, gunzip_to_file, ByteSource, HttpSource, TempPath};
use crate::{EngineError, Result};
use chrono::Utc;
use serde::Deserialize;
use std::cell::Cell;
use std::fs::File;

/// TMDB publishes a fresh movie id export every day, named after the UTC
/// publication date.
pub fn export_url(date_spec: &str) -> String {
    format!("https://files.tmdb.org/p/exports/movie_ids_{date_spec}.json.gz")
}

/// `MM_DD_YYYY` for the current UTC date.
pub fn export_date_spec() -> String {
    Utc::now().format("%m_%d_%Y").to_string()
}

#[derive(Debug, Deserialize)]
struct TmdbExportRow {
    id: Option<i64>,
    original_title: Option<String>,
    popularity: Option<f64>,
    video: Option<bool>,
}

/// Imports the daily TMDB movie id export: gzip-compressed NDJSON, one movie
/// object per line, upserted by TMDB id.
pub struct ImportTmdbJob {
    paths: AppPaths,
    source: Box<dyn ByteSource>,
}

impl ImportTmdbJob {
    pub fn new(paths: AppPaths) -> Self {
        Self {
            paths,
            source: Box::new(HttpSource::new(export_url(&export_date_spec()))),
        }
    }

    pub fn with_source(paths: AppPaths, source: Box<dyn ByteSource>) -> Self {
        Self { paths, source }
    }
}

impl BackgroundJob for ImportTmdbJob {
    fn run(&self, _args: &serde_json::Value, ctx: &TaskContext) -> Result<()> {
        ctx.report_progress(None, None, "Downloading data...");

        self.paths.ensure_dirs()?;
        let stamp = now_ms();
        let gz_path = TempPath::new(
            self.paths
                .cache_dir()
                .join(format!("tmdb_import_{stamp}.json.gz")),
        );
        download_to_file(self.source.as_ref(), gz_path.path(), ctx)?;

        ctx.report_progress(None, None, "Decompressing data...");
        let json_path = TempPath::new(
            self.paths
                .cache_dir()
                .join(format!("tmdb_import_{stamp}.json")),
        );
        let total_bytes = gunzip_to_file(gz_path.path(), json_path.path(), ctx)?;

        let conn = db::open(&self.paths)?;
        db::migrate(&conn)?;

        let file = File::open(json_path.path())?;
        let processed = Cell::new(0u64);

        process_lines(
            file,
            total_bytes,
            ctx,
            || format!("Processing records... {} titles processed", processed.get()),
            |line| {
                if line.trim().is_empty() {
                    return Ok(());
                }
                let row: TmdbExportRow = serde_json::from_str(line).map_err(|e| {
                    EngineError::ParseFailed(format!("bad export line: {e}"))
                })?;
                let (Some(id), Some(title)) = (row.id, row.original_title.as_deref()) else {
                    return Ok(());
                };
                movies::upsert_from_tmdb(
                    &conn,
                    &id.to_string(),
                    title,
                    row.popularity,
                    row.video.unwrap_or(false),
                )?;
                processed.set(processed.get() + 1);
                Ok(())
            },
        )?;

        ctx.report_progress(None, None, "Complete");
        Ok(())
    }
}
