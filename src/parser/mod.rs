//! Parsers for the scheduler's text output
//!
//! Both parsers are pure functions over the text captured by the session:
//!
//! - [`parse_status_output`] - column-aligned `status` listings → trees
//! - [`parse_info_output`] - `info -v` replies → [`ExtraFlowNodeInfo`](crate::info::ExtraFlowNodeInfo) records

mod info;
mod status;

pub use info::{parse_info_output, LIMIT_RESET};
pub use status::{build_tree_roots, parse_status_output, ParsedStatus};
