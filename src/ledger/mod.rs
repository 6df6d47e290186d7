//! Storage-free ledger logic: attribution, benefit merging, ban planning and
//! time slot arithmetic. Everything here is a pure function of its inputs.

pub mod benefits;
pub mod consumption;
pub mod freeze_plan;
pub mod slots;

pub use consumption::{CardConsumption, ConsumptionBreakdown, ConsumptionStatus};
pub use freeze_plan::BanPlan;
