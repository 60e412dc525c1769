use std::cell::OnceCell;
use std::collections::BTreeSet;

use mac_address::MacAddress;

use crate::advertisement::{self, AdvertisementElement};

/// A single advertisement report handed up by the adapter.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub address: MacAddress,
    pub rssi: i16,
    pub advertisement: Option<Vec<u8>>,
    elements: OnceCell<BTreeSet<AdvertisementElement>>,
}

impl ScanResult {
    pub fn new(address: MacAddress, rssi: i16, advertisement: Option<Vec<u8>>) -> Self {
        ScanResult {
            address,
            rssi,
            advertisement,
            elements: OnceCell::new(),
        }
    }

    /// Parsed advertisement, decoded on first use. `None` when the adapter
    /// did not deliver any advertising data.
    pub fn elements(&self) -> Option<&BTreeSet<AdvertisementElement>> {
        let data = self.advertisement.as_ref()?;
        Some(self.elements.get_or_init(|| advertisement::parse(data)))
    }

    pub fn services(&self) -> Vec<u16> {
        self.elements()
            .into_iter()
            .flatten()
            .filter_map(|element| match element {
                AdvertisementElement::ServiceUuid16(uuid) => Some(*uuid),
                AdvertisementElement::LocalName(_) => None,
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.elements()
            .into_iter()
            .flatten()
            .filter_map(|element| match element {
                AdvertisementElement::LocalName(name) => Some(name.clone()),
                AdvertisementElement::ServiceUuid16(_) => None,
            })
            .collect()
    }
}

/// A device that passed the filter during a scan window.
#[derive(Clone, Debug, PartialEq)]
pub struct Sighting {
    pub address: MacAddress,
    pub rssi: i16,
    pub services: Vec<u16>,
    pub names: Vec<String>,
}

impl From<&ScanResult> for Sighting {
    fn from(result: &ScanResult) -> Self {
        Sighting {
            address: result.address,
            rssi: result.rssi,
            services: result.services(),
            names: result.names(),
        }
    }
}

/// How a connection session ended.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    ConnectFailed,
    DiscoveryFailed,
    Completed { polls: usize },
    Aborted { polls: usize },
}
