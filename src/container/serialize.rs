//! # Whole-Row Serialization
//!
//! Round-trippable byte form of a row, used by spill pipelines. Per row:
//!
//! ```text
//! row := flag_bytes                      // bit-identical to the null block
//!      ( fixed_column | variable_column )*    // in column order
//! fixed_column    := raw slot bytes (type width)
//! variable_column := u32_le length || length bytes   // length 0 when null
//! ```
//!
//! The total byte count is pre-summed in one pass so the output buffer is
//! allocated exactly once.

use eyre::{ensure, Result};

use crate::heap::{HeapView, StringView};
use crate::RowPtr;

use super::{set_value_at, value_at, RowContainer};

/// Serialized rows packed into one contiguous buffer.
#[derive(Debug)]
pub struct SerializedRows {
    buffer: Vec<u8>,
    bounds: Vec<usize>,
}

impl SerializedRows {
    pub fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, index: usize) -> &[u8] {
        &self.buffer[self.bounds[index]..self.bounds[index + 1]]
    }

    pub fn total_bytes(&self) -> usize {
        self.buffer.len()
    }
}

impl RowContainer {
    /// Serializes the given rows into one buffer, one blob per row.
    pub fn extract_serialized_rows(&self, rows: &[RowPtr]) -> SerializedRows {
        let mut fixed_width_row = 0;
        let mut has_variable_width = false;
        for data_type in &self.types {
            match data_type.fixed_size() {
                Some(width) => fixed_width_row += width,
                None => has_variable_width = true,
            }
        }

        let mut total = (self.layout.flag_bytes + fixed_width_row) * rows.len();
        if has_variable_width {
            for &row in rows {
                for (column, data_type) in self.types.iter().enumerate() {
                    if data_type.is_variable_width() {
                        // 4 bytes of length plus the payload.
                        total += 4 + self.variable_size_at(row, column);
                    }
                }
            }
        }

        let mut buffer = Vec::with_capacity(total);
        let mut bounds = Vec::with_capacity(rows.len() + 1);
        bounds.push(0);
        for &row in rows {
            let flags = unsafe {
                std::slice::from_raw_parts(
                    row.add(self.layout.flags_offset),
                    self.layout.flag_bytes,
                )
            };
            buffer.extend_from_slice(flags);
            for (column, data_type) in self.types.iter().enumerate() {
                match data_type.fixed_size() {
                    Some(width) => {
                        let slot = unsafe {
                            std::slice::from_raw_parts(
                                row.add(self.layout.columns[column].offset()),
                                width,
                            )
                        };
                        buffer.extend_from_slice(slot);
                    }
                    None => self.extract_variable_size_at(row, column, &mut buffer),
                }
            }
            bounds.push(buffer.len());
        }
        debug_assert_eq!(buffer.len(), total);
        SerializedRows { buffer, bounds }
    }

    /// Loads one serialized blob into `row`, reallocating heap payloads
    /// and updating column stats.
    pub fn store_serialized_row(&mut self, data: &[u8], row: RowPtr) -> Result<()> {
        assert!(self.mutable, "can't store into a sealed row container");
        ensure!(
            data.len() >= self.layout.flag_bytes,
            "serialized row shorter than its flag bytes"
        );
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                row.add(self.layout.flags_offset),
                self.layout.flag_bytes,
            )
        };

        let heap_before = self.heap.cumulative_allocated();
        let mut offset = self.layout.flag_bytes;
        for column in 0..self.types.len() {
            match self.types[column].fixed_size() {
                Some(width) => {
                    ensure!(
                        offset + width <= data.len(),
                        "serialized row truncated at column {}",
                        column
                    );
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            data.as_ptr().add(offset),
                            row.add(self.layout.columns[column].offset()),
                            width,
                        )
                    };
                    offset += width;
                }
                None => {
                    offset += self.store_variable_size_at(&data[offset..], row, column)?;
                }
            }
            self.update_column_stats_from_row(row, column);
        }
        ensure!(offset == data.len(), "trailing bytes in serialized row");
        self.add_row_size_delta(row, heap_before);
        Ok(())
    }

    /// Appends `u32 length || payload` for one variable-width cell; a null
    /// cell writes length 0.
    fn extract_variable_size_at(&self, row: RowPtr, column: usize, out: &mut Vec<u8>) {
        if self.is_null_at(row, column) {
            out.extend_from_slice(&0u32.to_le_bytes());
            return;
        }
        let offset = self.layout.columns[column].offset();
        if self.types[column].is_string() {
            let view = unsafe { value_at::<StringView>(row, offset) };
            out.extend_from_slice(&(view.len() as u32).to_le_bytes());
            if view.is_inline() {
                out.extend_from_slice(view.inline_bytes());
            } else {
                self.heap.read_into(view.data_ptr(), view.len(), out);
            }
        } else {
            let view = unsafe { value_at::<HeapView>(row, offset) };
            out.extend_from_slice(&(view.len() as u32).to_le_bytes());
            if !view.is_empty() {
                self.heap.read_into(view.ptr(), view.len(), out);
            }
        }
    }

    /// Stores one `u32 length || payload` cell, returning bytes consumed.
    fn store_variable_size_at(&mut self, data: &[u8], row: RowPtr, column: usize) -> Result<usize> {
        ensure!(data.len() >= 4, "truncated variable column {}", column);
        let size = u32::from_le_bytes(data[..4].try_into().expect("4-byte slice")) as usize;
        ensure!(
            data.len() >= 4 + size,
            "truncated variable column {}",
            column
        );
        let offset = self.layout.columns[column].offset();
        if self.types[column].is_string() {
            if size > 0 {
                self.heap.copy_multipart(&data[4..4 + size], row, offset)?;
            } else {
                unsafe { set_value_at::<StringView>(row, offset, StringView::empty()) };
            }
        } else if size > 0 {
            let ptr = self.heap.allocate(&data[4..4 + size])?;
            unsafe { set_value_at::<HeapView>(row, offset, HeapView::new(ptr, size)) };
        } else {
            unsafe { set_value_at::<HeapView>(row, offset, HeapView::empty()) };
        }
        Ok(4 + size)
    }
}
