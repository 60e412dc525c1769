//! Decoder for raw BLE advertising data.
//!
//! Advertising payloads are a concatenation of AD structures, each laid out
//! as `[length][type][value; length - 1]`. Payloads come straight off the air
//! so anything may be truncated or garbage; decoding never fails, it just
//! returns whatever could be read before the data stopped making sense.

use std::collections::BTreeSet;

/// Incomplete list of 16-bit service class UUIDs.
pub const AD_INCOMPLETE_UUID16: u8 = 0x02;
/// Complete list of 16-bit service class UUIDs.
pub const AD_COMPLETE_UUID16: u8 = 0x03;
/// Shortened local name.
pub const AD_SHORT_NAME: u8 = 0x08;
/// Complete local name.
pub const AD_COMPLETE_NAME: u8 = 0x09;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AdvertisementElement {
    ServiceUuid16(u16),
    LocalName(String),
}

/// Parse an advertising payload into the elements we care about.
pub fn parse(data: &[u8]) -> BTreeSet<AdvertisementElement> {
    let mut elements = BTreeSet::new();

    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        let value = &data[i + 2..i + 1 + len];

        match ad_type {
            AD_INCOMPLETE_UUID16 | AD_COMPLETE_UUID16 => {
                elements.extend(
                    value
                        .chunks_exact(2)
                        .map(|pair| AdvertisementElement::ServiceUuid16(u16::from_le_bytes([pair[0], pair[1]]))),
                );
            }
            AD_SHORT_NAME | AD_COMPLETE_NAME => {
                if let Ok(name) = std::str::from_utf8(value) {
                    elements.insert(AdvertisementElement::LocalName(name.to_string()));
                }
            }
            _ => {}
        }

        i += len + 1;
    }

    elements
}

/// Encode service UUIDs and a local name as AD structures.
///
/// Used by backends that only hand us already-decoded advertisement
/// properties so the rest of the pipeline can work from raw bytes. Records
/// that would not fit a single length byte are truncated.
pub fn encode(services: &[u16], name: Option<&str>) -> Vec<u8> {
    let mut data = Vec::new();

    if !services.is_empty() {
        let uuids: Vec<u8> = services
            .iter()
            .take(u8::MAX as usize / 2 - 1)
            .flat_map(|uuid| uuid.to_le_bytes())
            .collect();
        data.push(uuids.len() as u8 + 1);
        data.push(AD_COMPLETE_UUID16);
        data.extend_from_slice(&uuids);
    }

    if let Some(name) = name.filter(|name| !name.is_empty()) {
        let mut end = name.len().min(u8::MAX as usize - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        data.push(end as u8 + 1);
        data.push(AD_COMPLETE_NAME);
        data.extend_from_slice(&name.as_bytes()[..end]);
    }

    data
}
