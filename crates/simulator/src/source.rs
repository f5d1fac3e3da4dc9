//! Key sources: the CSV catalog and a synthetic stand-in.

use dhtsim_types::Record;
use std::path::Path;
use tracing::debug;

/// Errors surfaced by the ingestion layer, outside the overlay core.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A required column is missing from the CSV header.
    #[error("csv schema: missing required column `{0}`")]
    CsvSchema(&'static str),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Load at most `limit` `(title, record)` pairs from a TMDB-style movies
/// CSV. Rows without a title are skipped; numeric fields parse leniently
/// and fall back to `None` on malformed input.
pub fn load_csv(path: &Path, limit: usize) -> Result<Vec<(String, Record)>, SourceError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = |name: &'static str| headers.iter().position(|h| h == name);
    let title_col = column("title").ok_or(SourceError::CsvSchema("title"))?;
    let id_col = column("id");
    let popularity_col = column("popularity");
    let vote_average_col = column("vote_average");
    let vote_count_col = column("vote_count");
    let release_date_col = column("release_date");

    let mut items = Vec::new();
    for row in reader.records() {
        let row = row?;
        let Some(title) = row.get(title_col).filter(|t| !t.is_empty()) else {
            continue;
        };
        let field = |col: Option<usize>| col.and_then(|c| row.get(c)).filter(|v| !v.is_empty());
        let record = Record {
            id: field(id_col).map(str::to_owned),
            popularity: field(popularity_col).and_then(parse_f64),
            vote_average: field(vote_average_col).and_then(parse_f64),
            vote_count: field(vote_count_col).and_then(parse_u64),
            release_date: field(release_date_col).map(str::to_owned),
        };
        items.push((title.to_owned(), record));
        if items.len() >= limit {
            break;
        }
    }
    debug!(items = items.len(), path = %path.display(), "loaded key source");
    Ok(items)
}

/// Deterministic label-derived catalog for tests and CSV-less smoke runs.
pub fn synthetic(count: usize) -> Vec<(String, Record)> {
    (0..count)
        .map(|i| {
            let record = Record {
                id: Some(i.to_string()),
                popularity: Some((i % 997) as f64 * 0.5),
                vote_average: Some(5.0 + (i % 50) as f64 / 10.0),
                vote_count: Some((i * 7 % 10_000) as u64),
                release_date: Some(format!("19{:02}-01-01", 70 + (i % 30))),
            };
            (format!("movie-{i:05}"), record)
        })
        .collect()
}

fn parse_f64(value: &str) -> Option<f64> {
    value.parse().ok()
}

fn parse_u64(value: &str) -> Option<u64> {
    // Counts sometimes arrive as floats ("123.0").
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|f| f as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_csv(name: &str, contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("dhtsim-{name}-{}.csv", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_titled_rows_and_skips_untitled() {
        let path = write_temp_csv(
            "rows",
            "id,title,popularity,vote_average,vote_count,release_date\n\
             1,Inception,82.5,8.4,30000,2010-07-16\n\
             2,,10.0,5.0,100,2000-01-01\n\
             3,Memento,44.1,8.2,1000.0,2000-10-11\n",
        );
        let items = load_csv(&path, 10).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, "Inception");
        assert_eq!(items[0].1.popularity, Some(82.5));
        // float-shaped counts parse leniently
        assert_eq!(items[1].1.vote_count, Some(1000));
    }

    #[test]
    fn missing_title_column_is_a_schema_error() {
        let path = write_temp_csv("schema", "id,name\n1,Inception\n");
        let err = load_csv(&path, 10).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, SourceError::CsvSchema("title")));
    }

    #[test]
    fn synthetic_catalog_is_deterministic() {
        assert_eq!(synthetic(10), synthetic(10));
        assert_eq!(synthetic(3)[2].0, "movie-00002");
    }
}
