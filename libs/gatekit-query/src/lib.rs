#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Read-path compiler: turns free-form search requests into store queries.
//!
//! Every stage validates against schema metadata and fails fast; a request
//! only reaches the store when its filter uses searchable fields, its sort
//! order is backed by a declared compound index, and its cursor matches the
//! sort. Stages run in a fixed order: filter, sort, cursor, index match,
//! direction, field projection, page size.

pub mod compiler;
pub mod cursor;
pub mod filter;
pub mod limits;
pub mod sort;

pub use compiler::{Direction, QueryCompiler, QueryRequest, StoreQuery};
pub use cursor::{Cursor, CursorBound};
pub use filter::FilterNode;
pub use limits::PageLimits;

/// Read-path validation failure. Each variant maps to one request input.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid sort: {0}")]
    InvalidSort(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid fields selection: {0}")]
    InvalidProjection(String),

    #[error("invalid direction: {0}")]
    InvalidDirection(String),

    #[error("invalid count: {0}")]
    InvalidCount(String),
}
