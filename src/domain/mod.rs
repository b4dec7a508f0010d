mod audit;
mod booking;
mod dispute;
mod ledger;
mod money;
mod pricing;
mod withdrawal;

pub use audit::*;
pub use booking::*;
pub use dispute::*;
pub use ledger::*;
pub use money::*;
pub use pricing::*;
pub use withdrawal::*;
