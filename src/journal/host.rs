//! Package and service state transitions are owned by the host's package and
//! service managers. The journal only needs to ask for the inverse transition
//! when reverting, which it does through [`HostControl`].

use super::event::{PackageState, ServiceState};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HostError(pub String);

pub trait HostControl {
    fn set_package_state(&mut self, package: &str, state: PackageState) -> Result<(), HostError>;

    fn set_service_state(&mut self, service: &str, state: ServiceState) -> Result<(), HostError>;
}

/// A host without package or service management.
///
/// File and permission events revert normally; package and service events
/// fail and stay in the journal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHost;

impl HostControl for NoHost {
    fn set_package_state(&mut self, package: &str, state: PackageState) -> Result<(), HostError> {
        Err(HostError(format!(
            "no package manager available to mark {package} {state}"
        )))
    }

    fn set_service_state(&mut self, service: &str, state: ServiceState) -> Result<(), HostError> {
        Err(HostError(format!(
            "no service manager available to mark {service} {state}"
        )))
    }
}
