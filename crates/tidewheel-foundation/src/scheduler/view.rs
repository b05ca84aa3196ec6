//! Per-tick snapshot of the running tenants.

use std::collections::HashSet;

use tidewheel_kernel::host::{Shell, TenantHost};

/// The set of running shells observed at the start of one tick, plus the
/// derived tenant name set used for registry pruning.
pub struct TenantView {
    shells: Vec<Shell>,
    tenants: HashSet<String>,
}

impl TenantView {
    /// Snapshot the host's currently running shells.
    pub fn capture(host: &dyn TenantHost) -> Self {
        let shells: Vec<Shell> = host
            .shells()
            .into_iter()
            .filter(|shell| shell.is_running())
            .collect();
        let tenants = shells.iter().map(|shell| shell.tenant.clone()).collect();
        Self { shells, tenants }
    }

    pub fn shells(&self) -> &[Shell] {
        &self.shells
    }

    pub fn tenants(&self) -> &HashSet<String> {
        &self.tenants
    }

    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }

    /// Whether the world has moved since this view was captured: any
    /// observed shell is now being released, or the number of running shells
    /// differs. Used by the inter-tick poll to decide whether to cut the
    /// wait short.
    pub fn changed_since(&self, host: &dyn TenantHost) -> bool {
        if self.shells.iter().any(|shell| shell.is_released()) {
            return true;
        }
        let running_now = host
            .shells()
            .iter()
            .filter(|shell| shell.is_running())
            .count();
        running_now != self.shells.len()
    }
}
