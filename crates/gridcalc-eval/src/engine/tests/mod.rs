mod common;

mod circular;
mod execution_modes;
mod failures;
mod incremental;
mod poisoned;
