pub mod function;
pub mod function_registry;
pub mod interpreter;
pub mod traits;

pub mod builtins;

pub use sheetcalc_common::{Position, SheetId, Zone};

#[cfg(test)]
pub mod test_utils;

pub mod engine;
pub mod telemetry;

#[cfg(test)]
mod tests;
