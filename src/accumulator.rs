//! # Accumulator Descriptors
//!
//! Aggregate state is opaque to the row store: the layout planner only
//! needs its size and alignment, the lifecycle only needs its destroy
//! hook, and spill only needs the extract hook. `AggregateFunction` is the
//! trait aggregate implementations provide; `Accumulator` is the
//! descriptor the container keeps.

use std::sync::Arc;

use crate::types::{DataType, Value};
use crate::RowPtr;

pub trait AggregateFunction: Send + Sync {
    /// Whether the accumulator occupies only its fixed-width slot. An
    /// accumulator that allocates variable-width data reports `false` so
    /// the row gets a variable-size counter.
    fn is_fixed_size(&self) -> bool;

    /// Bytes reserved in every row for this accumulator.
    fn fixed_width_size(&self) -> usize;

    /// Whether the accumulator holds memory outside the row (forces
    /// `clear` to walk live rows before dropping the arena).
    fn uses_external_memory(&self) -> bool;

    /// Required alignment of the accumulator slot. Must be a power of two.
    fn alignment(&self) -> usize;

    /// Type of the value produced when spilling this accumulator.
    fn spill_type(&self) -> DataType;

    /// Materializes accumulator state for spilling, one value per group.
    fn extract_for_spill(&self, groups: &[RowPtr], out: &mut Vec<Value>);

    /// Releases any out-of-row state for the given groups.
    fn destroy(&self, groups: &[RowPtr]);
}

/// Descriptor the container stores per accumulator.
#[derive(Clone)]
pub struct Accumulator {
    aggregate: Arc<dyn AggregateFunction>,
}

impl Accumulator {
    pub fn new(aggregate: Arc<dyn AggregateFunction>) -> Self {
        Self { aggregate }
    }

    pub fn is_fixed_size(&self) -> bool {
        self.aggregate.is_fixed_size()
    }

    pub fn fixed_width_size(&self) -> usize {
        self.aggregate.fixed_width_size()
    }

    pub fn uses_external_memory(&self) -> bool {
        self.aggregate.uses_external_memory()
    }

    pub fn alignment(&self) -> usize {
        self.aggregate.alignment()
    }

    pub fn spill_type(&self) -> DataType {
        self.aggregate.spill_type()
    }

    pub fn extract_for_spill(&self, groups: &[RowPtr], out: &mut Vec<Value>) {
        self.aggregate.extract_for_spill(groups, out);
    }

    pub fn destroy(&self, groups: &[RowPtr]) {
        self.aggregate.destroy(groups);
    }
}

impl std::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accumulator")
            .field("fixed_width_size", &self.fixed_width_size())
            .field("alignment", &self.alignment())
            .field("uses_external_memory", &self.uses_external_memory())
            .finish()
    }
}
