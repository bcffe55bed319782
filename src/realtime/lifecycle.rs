//! # Host Monitor
//!
//! Tracks the host's visibility, network and focus so repeated signals
//! (a second `offline`, a `visible` while already visible) can be dropped
//! before they reach the connection manager or the recovery orchestrator.

use crate::shared::event::LifecycleSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

/// Last known host state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostStatus {
    pub visible: bool,
    pub network: NetworkStatus,
    pub focused: bool,
}

impl Default for HostStatus {
    fn default() -> Self {
        Self {
            visible: true,
            network: NetworkStatus::Online,
            focused: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct HostMonitor {
    current: HostStatus,
}

impl HostMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_status(&self) -> HostStatus {
        self.current
    }

    /// Record `signal`; returns it when it changes the host state.
    ///
    /// `pageshow` always passes through since it is an event, not a state.
    pub fn observe(&mut self, signal: LifecycleSignal) -> Option<LifecycleSignal> {
        let changed = match signal {
            LifecycleSignal::Visibility { visible } => {
                std::mem::replace(&mut self.current.visible, visible) != visible
            }
            LifecycleSignal::Online => {
                std::mem::replace(&mut self.current.network, NetworkStatus::Online) != NetworkStatus::Online
            }
            LifecycleSignal::Offline => {
                std::mem::replace(&mut self.current.network, NetworkStatus::Offline) != NetworkStatus::Offline
            }
            LifecycleSignal::Focus => !std::mem::replace(&mut self.current.focused, true),
            LifecycleSignal::Blur => std::mem::replace(&mut self.current.focused, false),
            LifecycleSignal::PageShow { .. } => true,
        };
        if !changed {
            tracing::trace!("[Lifecycle] Ignoring redundant {:?}", signal);
        }
        changed.then_some(signal)
    }
}
