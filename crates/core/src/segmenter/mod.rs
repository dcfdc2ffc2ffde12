//! Document segmentation.
//!
//! Splits raw tender text into a header zone followed by pickup and
//! delivery blocks. Later stages use the zones to scope pattern matches and
//! customer rules: a label rule learned inside a pickup block should not
//! fire on the same label inside a delivery block.

mod patterns;
mod segment;

pub use patterns::{DEFAULT_LOOKBEHIND_WINDOW, MARKER_DEDUPE_DISTANCE};
pub use segment::{
    block_type_at_position, block_type_at_position_with_window, segment, BlockType, Segment,
    Segmentation,
};
