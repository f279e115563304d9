//! Query engine boundary and its in-memory implementation
//!
//! The cursor engine consumes rows one at a time through [`RowStream`]. Rows
//! that come from a single table carry the `RowId` they were read from, which
//! is what positioned updates (`WHERE CURRENT OF`) target.

use std::sync::Arc;

use tracing::debug;

use super::template::{Bindings, ColumnRef, Predicate, Projection, QueryTemplate, RowContext, SourceColumn};
use crate::error::{Error, Result};
use crate::storage::{Database, RowId, Tuple, Value};

/// One row produced by a query
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRow {
    /// Address of the stored row; `None` for rows assembled from several tables
    pub row_id: Option<RowId>,
    pub values: Tuple,
}

/// Lazily driven result set
pub trait RowStream: Send {
    /// Names of the produced columns
    fn columns(&self) -> &[String];

    /// Advance by one row; `None` once the stream is exhausted
    fn next_row(&mut self) -> Result<Option<StreamRow>>;

    /// Re-read a row this stream already yielded. Returns `None` when the row
    /// was deleted or no longer satisfies the query.
    fn refresh(&mut self, row_id: &RowId) -> Result<Option<Tuple>>;
}

/// Executes query templates against bound parameters
pub trait QueryEngine: Send + Sync {
    fn execute(&self, query: &QueryTemplate, binds: &Bindings) -> Result<Box<dyn RowStream>>;

    /// Source columns a query produces rows over, before projection
    fn source_columns(&self, query: &QueryTemplate) -> Result<Vec<SourceColumn>>;
}

/// Query engine over the in-memory [`Database`]
pub struct MemoryQueryEngine {
    db: Arc<Database>,
}

impl MemoryQueryEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn table_columns(&self, table: &str) -> Result<Vec<SourceColumn>> {
        let def = self.db.table_def(table)?;
        Ok(def
            .schema()
            .columns()
            .iter()
            .map(|c| SourceColumn {
                table: def.name().to_string(),
                name: c.name.clone(),
            })
            .collect())
    }

    fn projection_indices(
        query: &QueryTemplate,
        columns: &[SourceColumn],
    ) -> Result<(Vec<usize>, Vec<String>)> {
        match &query.projection {
            Projection::All => Ok((
                (0..columns.len()).collect(),
                columns.iter().map(|c| c.name.clone()).collect(),
            )),
            Projection::Columns(refs) => {
                let mut indices = Vec::with_capacity(refs.len());
                let mut names = Vec::with_capacity(refs.len());
                for col in refs {
                    let idx = position(columns, col).ok_or_else(|| {
                        Error::ColumnNotFound(col.to_string(), query.from.clone())
                    })?;
                    indices.push(idx);
                    names.push(col.column.clone());
                }
                Ok((indices, names))
            }
        }
    }
}

fn position(columns: &[SourceColumn], col: &ColumnRef) -> Option<usize> {
    columns.iter().position(|c| {
        c.name.eq_ignore_ascii_case(&col.column)
            && col
                .table
                .as_ref()
                .map_or(true, |t| c.table.eq_ignore_ascii_case(t))
    })
}

impl QueryEngine for MemoryQueryEngine {
    fn execute(&self, query: &QueryTemplate, binds: &Bindings) -> Result<Box<dyn RowStream>> {
        let columns = self.source_columns(query)?;
        let unknown = query.predicate.unknown_columns(&columns);
        if let Some(col) = unknown.into_iter().next() {
            return Err(Error::ColumnNotFound(col, query.from.clone()));
        }
        let (projection, names) = Self::projection_indices(query, &columns)?;
        debug!(query = %query, "executing query");

        match &query.join {
            None => Ok(Box::new(TableStream {
                db: self.db.clone(),
                slots: self.db.slots(&query.from)?.into_iter(),
                table: self.db.table_def(&query.from)?.name().to_string(),
                predicate: query.predicate.clone(),
                binds: binds.clone(),
                columns,
                projection,
                names,
            })),
            Some(join) => {
                let left_len = self.table_columns(&query.from)?.len();
                let left_key = position(&columns[..left_len], &join.left)
                    .or_else(|| position(&columns[..left_len], &join.right))
                    .ok_or_else(|| Error::ColumnNotFound(join.left.to_string(), query.from.clone()))?;
                let right_key = position(&columns[left_len..], &join.right)
                    .or_else(|| position(&columns[left_len..], &join.left))
                    .map(|i| i + left_len)
                    .ok_or_else(|| Error::ColumnNotFound(join.right.to_string(), join.table.clone()))?;

                Ok(Box::new(JoinStream {
                    db: self.db.clone(),
                    left_table: query.from.clone(),
                    right_table: join.table.clone(),
                    left_slots: self.db.slots(&query.from)?,
                    right_slots: self.db.slots(&join.table)?,
                    left_pos: 0,
                    right_pos: 0,
                    keys: (left_key, right_key),
                    predicate: query.predicate.clone(),
                    binds: binds.clone(),
                    columns,
                    projection,
                    names,
                }))
            }
        }
    }

    fn source_columns(&self, query: &QueryTemplate) -> Result<Vec<SourceColumn>> {
        let mut columns = self.table_columns(&query.from)?;
        if let Some(join) = &query.join {
            columns.extend(self.table_columns(&join.table)?);
        }
        Ok(columns)
    }
}

fn project(values: &[Value], projection: &[usize]) -> Tuple {
    Tuple::new(
        projection
            .iter()
            .map(|&i| values.get(i).cloned().unwrap_or(Value::Null))
            .collect(),
    )
}

/// Single-table scan. Slots are captured at execute time; each row's values are
/// read when the row is reached, so later changes by other statements are seen.
struct TableStream {
    db: Arc<Database>,
    table: String,
    slots: std::vec::IntoIter<u64>,
    predicate: Predicate,
    binds: Bindings,
    columns: Vec<SourceColumn>,
    projection: Vec<usize>,
    names: Vec<String>,
}

impl TableStream {
    fn qualifies(&self, tuple: &Tuple) -> Result<bool> {
        let ctx = RowContext {
            columns: &self.columns,
            values: tuple.values(),
        };
        self.predicate.matches(&ctx, &self.binds)
    }
}

impl RowStream for TableStream {
    fn columns(&self) -> &[String] {
        &self.names
    }

    fn next_row(&mut self) -> Result<Option<StreamRow>> {
        while let Some(slot) = self.slots.next() {
            let row_id = RowId::new(self.table.clone(), slot);
            let Some(tuple) = self.db.read(&row_id)? else {
                continue;
            };
            if self.qualifies(&tuple)? {
                return Ok(Some(StreamRow {
                    row_id: Some(row_id),
                    values: project(tuple.values(), &self.projection),
                }));
            }
        }
        Ok(None)
    }

    fn refresh(&mut self, row_id: &RowId) -> Result<Option<Tuple>> {
        match self.db.read(row_id)? {
            Some(tuple) if self.qualifies(&tuple)? => {
                Ok(Some(project(tuple.values(), &self.projection)))
            }
            _ => Ok(None),
        }
    }
}

/// Nested-loop equi-join driven one output row at a time
struct JoinStream {
    db: Arc<Database>,
    left_table: String,
    right_table: String,
    left_slots: Vec<u64>,
    right_slots: Vec<u64>,
    left_pos: usize,
    right_pos: usize,
    keys: (usize, usize),
    predicate: Predicate,
    binds: Bindings,
    columns: Vec<SourceColumn>,
    projection: Vec<usize>,
    names: Vec<String>,
}

impl RowStream for JoinStream {
    fn columns(&self) -> &[String] {
        &self.names
    }

    fn next_row(&mut self) -> Result<Option<StreamRow>> {
        let left = self.db.table(&self.left_table)?;
        let right = self.db.table(&self.right_table)?;

        while self.left_pos < self.left_slots.len() {
            let left_row = left.lock().unwrap().get(self.left_slots[self.left_pos]).cloned();
            let Some(left_row) = left_row else {
                self.left_pos += 1;
                self.right_pos = 0;
                continue;
            };

            while self.right_pos < self.right_slots.len() {
                let slot = self.right_slots[self.right_pos];
                self.right_pos += 1;
                let Some(right_row) = right.lock().unwrap().get(slot).cloned() else {
                    continue;
                };

                let mut values = left_row.values().to_vec();
                values.extend_from_slice(right_row.values());
                let (lk, rk) = self.keys;
                if values[lk].sql_compare(&values[rk]) != Some(std::cmp::Ordering::Equal) {
                    continue;
                }
                let ctx = RowContext {
                    columns: &self.columns,
                    values: &values,
                };
                if self.predicate.matches(&ctx, &self.binds)? {
                    return Ok(Some(StreamRow {
                        row_id: None,
                        values: project(&values, &self.projection),
                    }));
                }
            }

            self.left_pos += 1;
            self.right_pos = 0;
        }
        Ok(None)
    }

    fn refresh(&mut self, _row_id: &RowId) -> Result<Option<Tuple>> {
        Ok(None)
    }
}
