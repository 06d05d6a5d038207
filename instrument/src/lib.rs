//! Event tape for market runs.
//!
//! A `tracing` subscriber records every info-level event into a thread-local tape,
//! one table per target (`offer_placed`, `fill`, `price_index`, ...). Columns are
//! created from event fields as they appear; a field missing from an event is
//! recorded as null.
//!
//! ```ignore
//! tracing::subscriber::with_default(instrument::TapeSubscriber::all(), || {
//!     market.buy(/* ... */);
//! });
//! let tape = instrument::drain();
//! let fills = tape.to_dataframes()["fill"].clone();
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

// ============================================================================
// Tape storage
// ============================================================================

/// One column of a table. `None` marks an event without this field.
#[derive(Debug, Clone, PartialEq)]
pub enum TapeColumn {
    U64(Vec<Option<u64>>),
    I64(Vec<Option<i64>>),
    F64(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Str(Vec<Option<String>>),
}

impl TapeColumn {
    pub fn len(&self) -> usize {
        match self {
            TapeColumn::U64(v) => v.len(),
            TapeColumn::I64(v) => v.len(),
            TapeColumn::F64(v) => v.len(),
            TapeColumn::Bool(v) => v.len(),
            TapeColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pad_to(&mut self, rows: usize) {
        match self {
            TapeColumn::U64(v) => v.resize(rows, None),
            TapeColumn::I64(v) => v.resize(rows, None),
            TapeColumn::F64(v) => v.resize(rows, None),
            TapeColumn::Bool(v) => v.resize(rows, None),
            TapeColumn::Str(v) => v.resize(rows, None),
        }
    }

    fn to_polars(&self, name: &str) -> Column {
        match self {
            TapeColumn::U64(v) => Column::new(name.into(), v),
            TapeColumn::I64(v) => Column::new(name.into(), v),
            TapeColumn::F64(v) => Column::new(name.into(), v),
            TapeColumn::Bool(v) => Column::new(name.into(), v),
            TapeColumn::Str(v) => Column::new(name.into(), v),
        }
    }
}

/// Events of one target. All columns hold exactly `rows` entries between events.
#[derive(Debug, Clone, Default)]
pub struct TapeTable {
    pub columns: BTreeMap<String, TapeColumn>,
    pub rows: usize,
}

impl TapeTable {
    fn finish_row(&mut self) {
        self.rows += 1;
        let rows = self.rows;
        for column in self.columns.values_mut() {
            column.pad_to(rows);
        }
    }

    /// Values of a float column, nulls as `NaN`
    pub fn f64s(&self, name: &str) -> Vec<f64> {
        match self.columns.get(name) {
            Some(TapeColumn::F64(v)) => v.iter().map(|x| x.unwrap_or(f64::NAN)).collect(),
            _ => Vec::new(),
        }
    }

    pub fn u64s(&self, name: &str) -> Vec<Option<u64>> {
        match self.columns.get(name) {
            Some(TapeColumn::U64(v)) => v.clone(),
            _ => Vec::new(),
        }
    }

    pub fn strs(&self, name: &str) -> Vec<Option<String>> {
        match self.columns.get(name) {
            Some(TapeColumn::Str(v)) => v.clone(),
            _ => Vec::new(),
        }
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| column.to_polars(name))
            .collect();
        DataFrame::new(columns)
    }
}

/// Every recorded table, keyed by tracing target
#[derive(Debug, Clone, Default)]
pub struct Tape {
    pub tables: BTreeMap<String, TapeTable>,
}

impl Tape {
    pub fn table(&self, target: &str) -> Option<&TapeTable> {
        self.tables.get(target)
    }

    /// Number of events recorded under `target`
    pub fn count(&self, target: &str) -> usize {
        self.tables.get(target).map_or(0, |t| t.rows)
    }

    /// Tables that fail to convert are skipped
    pub fn to_dataframes(&self) -> BTreeMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

thread_local! {
    static TAPE: RefCell<Tape> = RefCell::default();
}

/// Take everything recorded on this thread so far
pub fn drain() -> Tape {
    TAPE.with(|t| std::mem::take(&mut *t.borrow_mut()))
}

pub fn clear() {
    TAPE.with(|t| *t.borrow_mut() = Tape::default());
}

// ============================================================================
// Subscriber
// ============================================================================

struct RowVisitor<'a> {
    table: &'a mut TapeTable,
}

impl RowVisitor<'_> {
    /// Column for `name`, padded up to the row being written
    fn column(&mut self, name: &str, empty: fn() -> TapeColumn) -> &mut TapeColumn {
        let rows = self.table.rows;
        let column = self
            .table
            .columns
            .entry(name.to_string())
            .or_insert_with(empty);
        column.pad_to(rows);
        column
    }
}

impl Visit for RowVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if let TapeColumn::U64(v) = self.column(field.name(), || TapeColumn::U64(Vec::new())) {
            v.push(Some(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let TapeColumn::I64(v) = self.column(field.name(), || TapeColumn::I64(Vec::new())) {
            v.push(Some(value));
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let TapeColumn::F64(v) = self.column(field.name(), || TapeColumn::F64(Vec::new())) {
            v.push(Some(value));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if let TapeColumn::Bool(v) = self.column(field.name(), || TapeColumn::Bool(Vec::new())) {
            v.push(Some(value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if let TapeColumn::Str(v) = self.column(field.name(), || TapeColumn::Str(Vec::new())) {
            v.push(Some(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}

/// Records info-level events into the thread-local tape. Spans are ignored.
#[derive(Debug, Clone, Default)]
pub struct TapeSubscriber {
    /// `None` records every target
    targets: Option<HashSet<String>>,
}

impl TapeSubscriber {
    pub fn all() -> Self {
        Self::default()
    }

    /// Record only the given targets
    pub fn only(targets: &[&str]) -> Self {
        Self {
            targets: Some(targets.iter().map(|t| t.to_string()).collect()),
        }
    }
}

impl Subscriber for TapeSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event()
            && *metadata.level() <= tracing::Level::INFO
            && self
                .targets
                .as_ref()
                .is_none_or(|targets| targets.contains(metadata.target()))
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();
        TAPE.with(|t| {
            let mut tape = t.borrow_mut();
            let table = tape.tables.entry(target).or_default();
            event.record(&mut RowVisitor { table: &mut *table });
            table.finish_row();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Make the tape the process-wide subscriber. Later calls are ignored.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(TapeSubscriber::all());
}

// ============================================================================
// Parquet output
// ============================================================================

/// Write each table as `{dir}/{target}.parquet`
pub fn save_parquet(dfs: &mut BTreeMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| PolarsError::IO {
        error: e.into(),
        msg: None,
    })?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(|e| {
            PolarsError::IO {
                error: e.into(),
                msg: None,
            }
        })?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

fn run_dir_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(60)
        .collect()
}

/// Clears the tape on creation and writes it to `{parent}/{name}/` as parquet on drop.
///
/// ```ignore
/// let mut run = instrument::ScopedTape::new("data", "price discovery");
/// // ... run the market ...
/// let fills = run.tape().count("fill");
/// // drop writes data/price_discovery/*.parquet
/// ```
pub struct ScopedTape {
    run_dir: PathBuf,
    tape: Option<Tape>,
}

impl ScopedTape {
    pub fn new(parent: impl Into<PathBuf>, name: &str) -> Self {
        clear();
        install_subscriber();
        Self {
            run_dir: parent.into().join(run_dir_name(name)),
            tape: None,
        }
    }

    /// Drains the thread-local tape on first call and keeps it for the drop
    pub fn tape(&mut self) -> &Tape {
        self.tape.get_or_insert_with(drain)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedTape {
    fn drop(&mut self) {
        let tape = self.tape.take().unwrap_or_else(drain);
        let mut dfs = tape.to_dataframes();
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            eprintln!("ScopedTape({}): failed to write parquet: {e}", self.run_dir.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::subscriber::with_default;

    #[test]
    fn test_events_become_rows() {
        clear();
        with_default(TapeSubscriber::all(), || {
            tracing::info!(target: "fill", offer_id = 1u64, amount = 10.0, price = 4.0);
            tracing::info!(target: "fill", offer_id = 2u64, amount = 5.0, price = 5.0);
            tracing::info!(target: "price_index", price_index = 10.0);
        });

        let tape = drain();
        assert_eq!(tape.count("fill"), 2);
        assert_eq!(tape.count("price_index"), 1);

        let fills = tape.table("fill").unwrap();
        assert_eq!(fills.u64s("offer_id"), vec![Some(1), Some(2)]);
        assert_eq!(fills.f64s("price"), vec![4.0, 5.0]);
    }

    #[test]
    fn test_missing_fields_are_null() {
        clear();
        with_default(TapeSubscriber::all(), || {
            tracing::info!(target: "settlement_failed", amount = 1.0);
            tracing::info!(target: "settlement_failed", amount = 2.0, error = "no goods");
            tracing::info!(target: "settlement_failed", error = "no money");
        });

        let tape = drain();
        let table = tape.table("settlement_failed").unwrap();
        assert_eq!(table.rows, 3);
        assert_eq!(
            table.strs("error"),
            vec![None, Some("no goods".to_string()), Some("no money".to_string())]
        );
        let amounts = table.f64s("amount");
        assert_eq!(&amounts[..2], &[1.0, 2.0]);
        assert!(amounts[2].is_nan());

        let df = table.to_dataframe().unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.column("error").unwrap().null_count(), 1);
    }

    #[test]
    fn test_target_filter_and_levels() {
        clear();
        with_default(TapeSubscriber::only(&["fill"]), || {
            tracing::info!(target: "fill", amount = 1.0);
            tracing::info!(target: "offer_placed", amount = 1.0);
            tracing::debug!(target: "fill", amount = 2.0);
        });

        let tape = drain();
        assert_eq!(tape.count("fill"), 1);
        assert!(tape.table("offer_placed").is_none());
    }

    #[test]
    fn test_run_dir_name() {
        assert_eq!(run_dir_name("price discovery/EUR"), "price_discovery_EUR");
        assert_eq!(run_dir_name(&"x".repeat(80)).len(), 60);
    }
}
