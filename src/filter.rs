use std::collections::BTreeSet;

use mac_address::MacAddress;

use crate::advertisement::AdvertisementElement;
use crate::messages::ScanResult;

/// Which devices a scan window reports.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterPolicy {
    /// Exactly one known device. Matching it leads to a connection.
    ExactMac(MacAddress),
    /// Anything advertising one of `services`, or whose local name contains
    /// `name`. Report only.
    ServiceOrNameMatch {
        services: BTreeSet<u16>,
        name: Option<String>,
    },
}

impl FilterPolicy {
    pub fn matches(&self, result: &ScanResult) -> bool {
        match self {
            FilterPolicy::ExactMac(target) => result.address.bytes() == target.bytes(),
            FilterPolicy::ServiceOrNameMatch { services, name } => {
                let Some(elements) = result.elements() else {
                    return false;
                };
                elements.iter().any(|element| match element {
                    AdvertisementElement::ServiceUuid16(uuid) => services.contains(uuid),
                    AdvertisementElement::LocalName(local_name) => name
                        .as_deref()
                        .is_some_and(|name| !name.is_empty() && local_name.contains(name)),
                })
            }
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, FilterPolicy::ExactMac(_))
    }
}
