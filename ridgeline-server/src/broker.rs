//! Shared broker state handed to every connection task: the partition
//! storage, the group coordinator, the throttle, and (optionally) SASL
//! credential verification. Constructed once by the composition root and
//! wired into [`crate::ConnServer`] (spec §9 "Global state": no process-wide
//! singletons, everything flows down from one root).

use std::sync::Arc;

use ridgeline_group::GroupCoordinator;
use ridgeline_log::PartitionRouter;
use ridgeline_security::Authenticator;
use ridgeline_throttle::Throttle;

pub struct Broker {
    pub router: Arc<PartitionRouter>,
    pub groups: Arc<GroupCoordinator>,
    pub throttle: Arc<Throttle>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub sasl_enabled: bool,
    pub node_id: i32,
    pub advertised_host: String,
    pub advertised_port: i32,
    pub shutdown_grace_secs: u64,
}

impl Broker {
    pub fn new(
        router: Arc<PartitionRouter>,
        groups: Arc<GroupCoordinator>,
        throttle: Arc<Throttle>,
        authenticator: Option<Arc<dyn Authenticator>>,
        sasl_enabled: bool,
        node_id: i32,
        advertised_host: String,
        advertised_port: i32,
        shutdown_grace_secs: u64,
    ) -> Self {
        Self {
            router,
            groups,
            throttle,
            authenticator,
            sasl_enabled,
            node_id,
            advertised_host,
            advertised_port,
            shutdown_grace_secs,
        }
    }
}
