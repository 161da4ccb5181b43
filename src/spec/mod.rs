//! Pipeline specification model.
//!
//! A specification is an ordered, versioned list of operations drawn from a
//! closed vocabulary. This module owns the wire format, the per-kind
//! parameter schemas, the structural gate, and typed step decoding.

pub mod model;
pub mod operation;
pub mod schema;
pub mod step;

pub use model::{diff, PipelineSpecification};
pub use operation::{Operation, OperationKind};
pub use schema::{check_parameters, schema_for, validate_structure, ParamSpec, ParamType};
pub use step::{
    AggregateFn, Aggregation, DeriveOp, FilterOp, Keep, Normalization, Operand, Predicate, Step,
};
