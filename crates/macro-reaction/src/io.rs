//! Input table loading.
//!
//! Every table is a headed CSV file. Headers are matched case-insensitively
//! after trimming, and a UTF-8 byte order mark on the first header is
//! ignored. Rows are parsed best-effort: a row that cannot be parsed is
//! skipped and counted, and the count is logged once per table.

use crate::dates::to_date;
use crate::error::{ReactionError, Result};
use crate::reaction::SectorBenchmarks;
use crate::types::{MacroEvent, PriceRow, RegimeWindow, SectorMembership, sort_events};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the price table inside a market data directory.
pub const PRICES_FILE: &str = "prices.csv";
/// File name of the ticker to sector table.
pub const TICKERS_FILE: &str = "tickers.csv";
/// File name of the macro event table.
pub const EVENTS_FILE: &str = "macro_events.csv";
/// File name of the optional sector benchmark table.
pub const SECTOR_BENCHMARKS_FILE: &str = "sector_benchmarks.csv";
/// File name of the optional regime table.
pub const REGIMES_FILE: &str = "macro_regimes.csv";

/// Locations of the input tables of one market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPaths {
    /// Adjusted close prices
    pub prices: PathBuf,
    /// Ticker to sector mapping
    pub tickers: PathBuf,
    /// Macro events
    pub events: PathBuf,
    /// Sector benchmark tickers (optional)
    pub sector_benchmarks: PathBuf,
    /// Regime windows (optional)
    pub regimes: PathBuf,
}

impl InputPaths {
    /// Standard file names inside `data_dir`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self {
            prices: dir.join(PRICES_FILE),
            tickers: dir.join(TICKERS_FILE),
            events: dir.join(EVENTS_FILE),
            sector_benchmarks: dir.join(SECTOR_BENCHMARKS_FILE),
            regimes: dir.join(REGIMES_FILE),
        }
    }
}

/// Header name to column position.
#[derive(Debug)]
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_lowercase(), i))
                .collect(),
        )
    }

    /// First present column among `names`.
    fn find(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.0.get(*n).copied())
    }

    fn require(&self, table: &str, names: &[&str]) -> Result<usize> {
        self.find(names)
            .ok_or_else(|| ReactionError::MissingColumn(format!("{table}.{}", names.join("|"))))
    }
}

/// Trimmed field, `None` when absent or blank.
fn field(record: &StringRecord, col: Option<usize>) -> Option<&str> {
    col.and_then(|c| record.get(c))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn number(record: &StringRecord, col: Option<usize>) -> Option<f64> {
    field(record, col)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(input)
}

/// Parse every remaining record with `parse`, skipping rows it rejects.
fn parse_rows<R, T, F>(table: &str, mut rdr: csv::Reader<R>, mut parse: F) -> Result<Vec<T>>
where
    R: Read,
    F: FnMut(&StringRecord) -> Option<T>,
{
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for record in rdr.records() {
        match record {
            Ok(rec) => match parse(&rec) {
                Some(row) => out.push(row),
                None => skipped += 1,
            },
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(table, skipped, kept = out.len(), "skipped malformed rows");
    }
    debug!(table, rows = out.len(), "loaded table");
    Ok(out)
}

fn columns<R: Read>(input: &mut csv::Reader<R>) -> Result<Columns> {
    Ok(Columns::new(input.headers()?))
}

/// Read the price table: `date,ticker,adj_close`.
pub fn read_prices<R: Read>(input: R) -> Result<Vec<PriceRow>> {
    let mut rdr = reader(input);
    let cols = columns(&mut rdr)?;
    let date = Some(cols.require("prices", &["date"])?);
    let ticker = Some(cols.require("prices", &["ticker"])?);
    let close = Some(cols.require("prices", &["adj_close"])?);
    parse_rows("prices", rdr, |rec| {
        Some(PriceRow::new(
            to_date(field(rec, date)?)?,
            field(rec, ticker)?,
            number(rec, close)?,
        ))
    })
}

/// Read the ticker table: `ticker,sector`. Blank sectors map to `UNKNOWN`.
pub fn read_tickers<R: Read>(input: R) -> Result<SectorMembership> {
    let mut rdr = reader(input);
    let cols = columns(&mut rdr)?;
    let ticker = Some(cols.require("tickers", &["ticker"])?);
    let sector = Some(cols.require("tickers", &["sector"])?);
    let pairs = parse_rows("tickers", rdr, |rec| {
        Some((field(rec, ticker)?.to_string(), field(rec, sector).unwrap_or_default().to_string()))
    })?;
    Ok(pairs.into_iter().collect())
}

/// Read the event table. Only `event_date` is required; rows come back
/// sorted by `(event_date, event_name)`.
///
/// A blank event id is replaced by `<event_date>:<event_name>`.
pub fn read_events<R: Read>(input: R) -> Result<Vec<MacroEvent>> {
    let mut rdr = reader(input);
    let cols = columns(&mut rdr)?;
    let date = Some(cols.require("events", &["event_date"])?);
    let id = cols.find(&["event_id", "id"]);
    let name = cols.find(&["event_name", "name"]);
    let event_type = cols.find(&["event_type"]);
    let importance = cols.find(&["importance"]);
    let expected = cols.find(&["expected_value"]);
    let actual = cols.find(&["actual_value"]);

    let mut events = parse_rows("events", rdr, |rec| {
        let event_date = to_date(field(rec, date)?)?;
        let event_name = field(rec, name).unwrap_or_default().to_string();
        let event_id = field(rec, id)
            .map_or_else(|| format!("{event_date}:{event_name}"), str::to_string);
        Some(MacroEvent {
            event_id,
            event_name,
            event_date,
            event_type: field(rec, event_type).unwrap_or_default().to_string(),
            importance: field(rec, importance).unwrap_or_default().to_string(),
            expected_value: number(rec, expected),
            actual_value: number(rec, actual),
        })
    })?;
    sort_events(&mut events);
    Ok(events)
}

/// Read the sector benchmark table: `sector` plus one of
/// `benchmark_ticker`, `benchmark_symbol`, `benchmark_code`.
pub fn read_sector_benchmarks<R: Read>(input: R) -> Result<SectorBenchmarks> {
    let mut rdr = reader(input);
    let cols = columns(&mut rdr)?;
    let sector = Some(cols.require("sector_benchmarks", &["sector"])?);
    let ticker = Some(cols.require(
        "sector_benchmarks",
        &["benchmark_ticker", "benchmark_symbol", "benchmark_code"],
    )?);
    let pairs = parse_rows("sector_benchmarks", rdr, |rec| {
        Some((field(rec, sector)?.to_string(), field(rec, ticker)?.to_string()))
    })?;
    Ok(pairs.into_iter().collect())
}

/// Read the regime table: `start_date,end_date,regime`. Reversed ranges
/// are swapped, unnamed regimes are skipped, and the result is ordered by
/// `(start_date, end_date)`.
pub fn read_regimes<R: Read>(input: R) -> Result<Vec<RegimeWindow>> {
    let mut rdr = reader(input);
    let cols = columns(&mut rdr)?;
    let start = Some(cols.require("regimes", &["start_date"])?);
    let end = Some(cols.require("regimes", &["end_date"])?);
    let name = Some(cols.require("regimes", &["regime"])?);
    let mut regimes = parse_rows("regimes", rdr, |rec| {
        Some(RegimeWindow::new(
            to_date(field(rec, start)?)?,
            to_date(field(rec, end)?)?,
            field(rec, name)?,
        ))
    })?;
    regimes.sort_by_key(|r| (r.start_date, r.end_date));
    Ok(regimes)
}

fn open_required(table: &str, path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(ReactionError::MissingInput {
            table: table.to_string(),
            path: path.display().to_string(),
        });
    }
    Ok(File::open(path)?)
}

fn open_optional(table: &str, path: &Path) -> Result<Option<File>> {
    if !path.exists() {
        debug!(table, path = %path.display(), "optional table not found");
        return Ok(None);
    }
    Ok(Some(File::open(path)?))
}

/// Load the price table from disk.
pub fn load_prices(path: &Path) -> Result<Vec<PriceRow>> {
    read_prices(open_required("prices", path)?)
}

/// Load the ticker table from disk.
pub fn load_tickers(path: &Path) -> Result<SectorMembership> {
    read_tickers(open_required("tickers", path)?)
}

/// Load the event table from disk.
pub fn load_events(path: &Path) -> Result<Vec<MacroEvent>> {
    read_events(open_required("events", path)?)
}

/// Load the sector benchmark table, empty when the file is absent.
pub fn load_sector_benchmarks(path: &Path) -> Result<SectorBenchmarks> {
    open_optional("sector_benchmarks", path)?
        .map_or_else(|| Ok(SectorBenchmarks::new()), read_sector_benchmarks)
}

/// Load the regime table, empty when the file is absent.
pub fn load_regimes(path: &Path) -> Result<Vec<RegimeWindow>> {
    open_optional("regimes", path)?.map_or_else(|| Ok(Vec::new()), read_regimes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_read_prices_skips_bad_rows() {
        let data = "\u{feff}date,ticker,adj_close\n\
                    2024-01-02,AAA,100.5\n\
                    2024-01-03,AAA,abc\n\
                    bad-date,AAA,101\n\
                    2024-01-03,,101\n\
                    2024-01-03, BBB ,50\n";
        let rows = read_prices(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], PriceRow::new(d(2024, 1, 2), "AAA", 100.5));
        assert_eq!(rows[1].ticker, "BBB");
    }

    #[test]
    fn test_missing_required_column() {
        let err = read_prices("date,ticker,close\n2024-01-02,AAA,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ReactionError::MissingColumn(ref c) if c == "prices.adj_close"));
    }

    #[test]
    fn test_read_tickers_blank_sector() {
        let data = "ticker,sector\nAAA,Tech\nBBB,\n,Energy\n";
        let membership = read_tickers(data.as_bytes()).unwrap();
        assert_eq!(membership.len(), 2);
        assert_eq!(membership.sector_of("AAA"), "Tech");
        assert_eq!(membership.sector_of("BBB"), "UNKNOWN");
    }

    #[test]
    fn test_read_events_aliases_and_order() {
        let data = "id,name,event_date,event_type,importance,expected_value,actual_value\n\
                    e2,CPI YoY,2024-02-13,CPI,high,3.0,3.1\n\
                    e1,NFP,2024-02-02,NFP,high,,350\n\
                    ,GDP,2024-02-02,GDP,medium,x,1.0\n\
                    e9,Broken,02/14/2024,CPI,high,1,1\n";
        let events = read_events(data.as_bytes()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_id, "2024-02-02:GDP");
        assert_eq!(events[0].expected_value, None);
        assert_eq!(events[1].event_id, "e1");
        assert_eq!(events[1].actual_value, Some(350.0));
        assert_eq!(events[2].event_type, "CPI");
    }

    #[test]
    fn test_read_sector_benchmarks_alternate_header() {
        let data = "sector,benchmark_symbol\nTech,XLK\nEnergy,\n";
        let map = read_sector_benchmarks(data.as_bytes()).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["Tech"], "XLK");
    }

    #[test]
    fn test_read_regimes() {
        let data = "start_date,end_date,regime\n\
                    2022-12-31,2022-01-01,tightening\n\
                    2023-01-01,2023-06-30,\n";
        let regimes = read_regimes(data.as_bytes()).unwrap();
        assert_eq!(regimes.len(), 1);
        assert_eq!(regimes[0].start_date, d(2022, 1, 1));
        assert_eq!(regimes[0].name, "tightening");
    }

    #[test]
    fn test_missing_files() {
        let dir = std::env::temp_dir().join("macro-reaction-missing-inputs");
        let paths = InputPaths::in_dir(&dir);
        assert!(matches!(
            load_prices(&paths.prices),
            Err(ReactionError::MissingInput { ref table, .. }) if table == "prices"
        ));
        assert!(load_regimes(&paths.regimes).unwrap().is_empty());
        assert!(load_sector_benchmarks(&paths.sector_benchmarks).unwrap().is_empty());
    }
}
