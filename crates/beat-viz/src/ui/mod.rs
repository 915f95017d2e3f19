mod bindings;

pub use bindings::{parse_key, Action, VOLUME_STEP};
