//! Data plane components
//!
//! Flow model, expiring flow table, port index allocation and the NAPT
//! translator built on them.

mod allocator;
mod flow;
mod flow_table;
mod napt;
mod shared;

pub use allocator::{AllocationPolicy, IndexAllocator};
pub use flow::{Clock, FlowEntry, FlowKey, InterfaceId, PortIndex, Timestamp};
pub use flow_table::{FlowTable, MAX_CAPACITY};
pub use napt::{DropReason, LinkRewrite, NatConfig, Translation, Translator, VerifyOrder};
pub use shared::SharedTranslator;
