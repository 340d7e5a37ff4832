//! Consumer-group coordinator: membership, the Empty/PreparingRebalance/
//! CompletingRebalance/Stable/Dead protocol, and the committed-offset
//! store. See spec §4.4.

#![warn(clippy::all)]

mod coordinator;
mod group;

pub use coordinator::GroupCoordinator;
pub use group::{
    Group, GroupSnapshot, GroupState, JoinGroupOutcome, JoinGroupRequest, MemberInfo, OffsetEntry,
    SyncGroupOutcome, TickResult,
};
