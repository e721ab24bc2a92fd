use crate::db::{self, now_ms};
use crate::jobs::{BackgroundJob, TaskContext};
use crate::lines::process_lines;
use crate::movies;
use crate::paths::AppPaths;
use crate::transfer::{download_to_file, ByteSource, HttpSource, TempPath};
use crate::{EngineError, Result};
use std::cell::Cell;
use std::fs::File;

pub const WATCHMODE_CSV_URL: &str = "https://api.watchmode.com/datasets/title_id_map.csv";

/// Imports the Watchmode title/id mapping CSV. Only rows whose TMDB type is
/// `movie` are kept; each kept row is upserted by its Watchmode id.
pub struct ImportWatchmodeJob {
    paths: AppPaths,
    source: Box<dyn ByteSource>,
}

impl ImportWatchmodeJob {
    pub fn new(paths: AppPaths) -> Self {
        Self {
            paths,
            source: Box::new(HttpSource::new(WATCHMODE_CSV_URL)),
        }
    }

    pub fn with_source(paths: AppPaths, source: Box<dyn ByteSource>) -> Self {
        Self { paths, source }
    }
}

/// Column positions resolved from the header, case-insensitively. The feed
/// has reordered columns before; never trust fixed offsets. `arity` is the
/// header's field count; every data row must match it exactly.
struct CsvColumns {
    arity: usize,
    watchmode_id: usize,
    tmdb_type: usize,
    tmdb_id: usize,
    title: usize,
    year: usize,
}

impl CsvColumns {
    fn from_header(header: &str) -> Result<Self> {
        let fields = parse_csv_line(header)?
            .ok_or_else(|| EngineError::ParseFailed("empty csv header".to_string()))?;
        let find = |name: &str| {
            fields
                .iter()
                .position(|f| f.eq_ignore_ascii_case(name))
                .ok_or_else(|| EngineError::ParseFailed(format!("missing csv column: {name}")))
        };
        Ok(Self {
            arity: fields.len(),
            watchmode_id: find("Watchmode ID")?,
            tmdb_type: find("TMDB Type")?,
            tmdb_id: find("TMDB ID")?,
            title: find("Title")?,
            year: find("Year")?,
        })
    }
}

/// Parses one CSV record, honoring quoted fields with embedded commas and
/// doubled quotes. Returns `None` for a blank line.
fn parse_csv_line(line: &str) -> Result<Option<Vec<String>>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(None);
    }
    Ok(Some(record.iter().map(|f| f.to_string()).collect()))
}

impl BackgroundJob for ImportWatchmodeJob {
    fn run(&self, _args: &serde_json::Value, ctx: &TaskContext) -> Result<()> {
        ctx.report_progress(None, None, "Downloading data...");

        self.paths.ensure_dirs()?;
        let csv_path = TempPath::new(
            self.paths
                .cache_dir()
                .join(format!("watchmode_import_{}.csv", now_ms())),
        );
        download_to_file(self.source.as_ref(), csv_path.path(), ctx)?;

        let total_bytes = std::fs::metadata(csv_path.path())?.len();
        let conn = db::open(&self.paths)?;
        db::migrate(&conn)?;

        let file = File::open(csv_path.path())?;
        let processed = Cell::new(0u64);
        let mut columns: Option<CsvColumns> = None;

        process_lines(
            file,
            total_bytes,
            ctx,
            || format!("Processing records... {} titles processed", processed.get()),
            |line| {
                let Some(fields) = parse_csv_line(line)? else {
                    return Ok(());
                };
                let cols = match &columns {
                    Some(cols) => cols,
                    None => {
                        columns = Some(CsvColumns::from_header(line)?);
                        return Ok(());
                    }
                };

                // A row whose field count disagrees with the header is
                // malformed input, not a row to skip.
                if fields.len() != cols.arity {
                    return Err(EngineError::ParseFailed(format!(
                        "csv row has {} fields, expected {}",
                        fields.len(),
                        cols.arity
                    )));
                }

                let field = |idx: usize| fields[idx].as_str();
                if field(cols.tmdb_type).eq_ignore_ascii_case("movie") {
                    let watchmode_id = field(cols.watchmode_id);
                    let tmdb_id = field(cols.tmdb_id);
                    if !watchmode_id.is_empty() && !tmdb_id.is_empty() {
                        let year = match field(cols.year) {
                            "" => None,
                            y => Some(y),
                        };
                        movies::upsert_from_watchmode(
                            &conn,
                            watchmode_id,
                            tmdb_id,
                            field(cols.title),
                            year,
                        )?;
                    }
                }
                processed.set(processed.get() + 1);
                Ok(())
            },
        )?;

        ctx.report_progress(None, None, "Complete");
        Ok(())
    }
}
