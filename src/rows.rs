//! Query results.
//!
//! A [`RowSet`] holds the rows of one statement, buffered by a
//! [`RowCache`] and materialized into [`Value`]s on demand. A
//! [`MultiResult`] strings row sets together when a batch held several
//! statements.
use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;

use crate::{
    Error, Result,
    protocol::{
        ColType,
        backend::{ColumnDesc, DataRow, RowDescription},
    },
    row::{Value, decode_column},
    rowcache::RowCache,
};

/// Rows produced by a single statement.
#[derive(Debug, Default)]
pub struct RowSet {
    columns: RowDescription,
    cache: RowCache,
    tz_offset: String,
}

impl RowSet {
    pub(crate) fn new(columns: RowDescription, tz_offset: &str, in_mem_row_limit: usize) -> Self {
        Self {
            columns,
            cache: RowCache::new(in_mem_row_limit),
            tz_offset: tz_offset.to_string(),
        }
    }

    /// A set with no columns and no rows, used when a statement produced
    /// no row description.
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn add_row(&mut self, row: DataRow) {
        self.cache.add_row(row.into_bytes());
    }

    pub(crate) fn finalize(&mut self) -> std::io::Result<()> {
        self.cache.finalize()
    }

    /// The column descriptors of this set.
    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns.columns
    }

    /// The names of all of the columns.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.columns.iter().map(|c| c.field_name.as_str()).collect()
    }

    /// Type name of column `idx` as the standard sql layer reports it.
    pub fn column_type_name(&self, idx: usize) -> &'static str {
        self.columns.columns[idx].col_type().database_type_name()
    }

    /// Whether column `idx` may hold NULL.
    pub fn column_nullable(&self, idx: usize) -> bool {
        self.columns.columns[idx].nullable
    }

    /// Declared length of column `idx`, `None` for fixed-width types.
    pub fn column_length(&self, idx: usize) -> Option<i64> {
        let col = &self.columns.columns[idx];
        match col.length {
            len if len < 0 => Some(col.type_modifier as i64),
            _ => None,
        }
    }

    /// Precision and scale for a Numeric column, from the type modifier.
    pub fn column_precision_scale(&self, idx: usize) -> Option<(i64, i64)> {
        let col = &self.columns.columns[idx];
        if col.col_type() != ColType::Numeric || col.type_modifier < 4 {
            return None;
        }
        let typmod = (col.type_modifier - 4) as i64;
        Some(((typmod >> 16) & 0xffff, typmod & 0xffff))
    }

    /// Pull and materialize the next row, `None` when exhausted.
    pub fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        let Some(frame) = self.cache.get_row()? else {
            return Ok(None);
        };
        let row = DataRow::from_bytes(frame);

        let mut values = Vec::with_capacity(self.columns.columns.len());
        let mut chunks = row.chunks();
        for col in &self.columns.columns {
            let Some(chunk) = chunks.next() else {
                return Err(Error::protocol_desync("row narrower than its description"));
            };
            values.push(decode_column(
                col.col_type(),
                chunk.as_deref(),
                &self.tz_offset,
            )?);
        }

        Ok(Some(values))
    }

    /// Release the row buffer; deletes any spill file.
    pub fn close(self) -> Result<()> {
        self.cache.close()?;
        Ok(())
    }
}

impl Stream for RowSet {
    type Item = Result<Vec<Value>>;

    fn poll_next(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().next_row().transpose())
    }
}

/// Ordered row sets of a multi-statement batch.
///
/// Iteration and column metadata always target the active set;
/// [`next_result_set`][MultiResult::next_result_set] advances it.
#[derive(Debug, Default)]
pub struct MultiResult {
    sets: Vec<RowSet>,
    current: usize,
}

impl MultiResult {
    pub(crate) fn new(sets: Vec<RowSet>) -> Self {
        Self { sets, current: 0 }
    }

    pub(crate) fn single(set: RowSet) -> Self {
        Self { sets: vec![set], current: 0 }
    }

    /// The active row set.
    pub fn rows(&mut self) -> &mut RowSet {
        &mut self.sets[self.current]
    }

    /// Column descriptors of the active set.
    pub fn columns(&self) -> &[ColumnDesc] {
        self.sets[self.current].columns()
    }

    /// Pull the next row of the active set.
    pub fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        self.rows().next_row()
    }

    /// Whether another buffered result set follows the active one.
    pub fn has_next_result_set(&self) -> bool {
        self.current + 1 < self.sets.len()
    }

    /// Advance to the next buffered result set.
    pub fn next_result_set(&mut self) -> bool {
        if !self.has_next_result_set() {
            return false;
        }
        self.current += 1;
        true
    }

    /// Read the rows-affected count: the first column of the first row of
    /// the active set, 0 when the set is empty.
    pub fn rows_affected(&mut self) -> Result<u64> {
        match self.next_row()? {
            Some(row) => Ok(row
                .first()
                .and_then(Value::as_i64)
                .map(|n| n.max(0) as u64)
                .unwrap_or_default()),
            None => Ok(0),
        }
    }

    /// Close every member set, reporting the first error.
    pub fn close(self) -> Result<()> {
        let mut first_err = None;
        for set in self.sets {
            if let Err(err) = set.close() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::protocol::{BackendProtocol, BufMutExt};

    fn desc(cols: &[(&str, u32)]) -> RowDescription {
        let mut buf = BytesMut::new();
        buf.put_u16(cols.len() as u16);
        for (i, (name, oid)) in cols.iter().enumerate() {
            buf.put_nul_string(name);
            buf.put_u32(i as u32 + 1);
            buf.put_u32(*oid);
            buf.put_i16(8);
            buf.put_i32(-1);
            buf.put_u8(1);
        }
        RowDescription::decode(b'T', buf.freeze()).unwrap()
    }

    fn data_row(cols: &[Option<&[u8]>]) -> DataRow {
        let mut buf = BytesMut::new();
        buf.put_u16(cols.len() as u16);
        for col in cols {
            match col {
                Some(bytes) => {
                    buf.put_i32(bytes.len() as i32);
                    buf.put_slice(bytes);
                }
                None => buf.put_i32(-1),
            }
        }
        DataRow::decode(b'D', buf.freeze()).unwrap()
    }

    #[test]
    fn materializes_rows_in_order() {
        let mut set = RowSet::new(desc(&[("a", 6), ("b", 9), ("c", 5)]), "+00", 0);
        set.add_row(data_row(&[Some(b"123"), Some(b"hello"), Some(b"t")]));
        set.add_row(data_row(&[Some(b"456"), None, Some(b"f")]));
        set.finalize().unwrap();

        assert_eq!(set.column_names(), ["a", "b", "c"]);
        assert_eq!(
            set.next_row().unwrap().unwrap(),
            [Value::Int(123), Value::String("hello".into()), Value::Bool(true)]
        );
        assert_eq!(
            set.next_row().unwrap().unwrap(),
            [Value::Int(456), Value::Null, Value::Bool(false)]
        );
        assert!(set.next_row().unwrap().is_none());
        set.close().unwrap();
    }

    #[test]
    fn spilled_rows_materialize_identically() {
        let mut set = RowSet::new(desc(&[("n", 6)]), "+00", 4);
        for i in 0..32 {
            set.add_row(data_row(&[Some(i.to_string().as_bytes())]));
        }
        set.finalize().unwrap();

        for i in 0..32 {
            assert_eq!(set.next_row().unwrap().unwrap(), [Value::Int(i)]);
        }
        assert!(set.next_row().unwrap().is_none());
        set.close().unwrap();
    }

    #[test]
    fn numeric_precision_scale() {
        // precision 10, scale 4: typmod = (10 << 16) + 4 + 4
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_nul_string("amount");
        buf.put_u32(1);
        buf.put_u32(16);
        buf.put_i16(-1);
        buf.put_i32((10 << 16) + 4 + 4);
        buf.put_u8(1);
        let set = RowSet::new(RowDescription::decode(b'T', buf.freeze()).unwrap(), "+00", 0);

        assert_eq!(set.column_precision_scale(0), Some((10, 4)));
        assert_eq!(set.column_type_name(0), "NUMERIC");
    }

    #[test]
    fn multi_result_stepping() {
        let mut first = RowSet::new(desc(&[("a", 6)]), "+00", 0);
        first.add_row(data_row(&[Some(b"1")]));
        first.finalize().unwrap();

        let mut second = RowSet::new(desc(&[("b", 9)]), "+00", 0);
        second.add_row(data_row(&[Some(b"two")]));
        second.finalize().unwrap();

        let mut multi = MultiResult::new(vec![first, second]);
        assert_eq!(multi.next_row().unwrap().unwrap(), [Value::Int(1)]);
        assert!(multi.has_next_result_set());
        assert!(multi.next_result_set());
        assert_eq!(multi.columns()[0].field_name, "b");
        assert_eq!(multi.next_row().unwrap().unwrap(), [Value::String("two".into())]);
        assert!(!multi.next_result_set());
        multi.close().unwrap();
    }

    #[test]
    fn rows_affected_reads_first_column() {
        let mut set = RowSet::new(desc(&[("OUTPUT", 6)]), "+00", 0);
        set.add_row(data_row(&[Some(b"7")]));
        set.finalize().unwrap();
        let mut multi = MultiResult::single(set);
        assert_eq!(multi.rows_affected().unwrap(), 7);

        let mut empty = MultiResult::single(RowSet::empty());
        assert_eq!(empty.rows_affected().unwrap(), 0);
    }
}
