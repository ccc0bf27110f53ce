mod exit_bus;
mod locator;

pub use exit_bus::{ExitBusOracle, InconsistentEvents, search_windows};
pub use locator::LidoLocator;
