// reconcile.rs
//! Joins the commission roster with scraped result cells.
//!
//! The two sources share no identifier. Result pages are keyed by a record id
//! whose first seven digits identify the region; the roster carries the same
//! prefix on each region commission's external id, plus a region name and a
//! station name from which a station number can be read. The join key is
//! therefore `(region name, station number)`.

use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::StructuralError;
use crate::feature_schema::Feature;
use crate::models::{
    Address, CommissionNode, PollingStationRecord, ResultCell, StationStats, VoteTally,
};
use crate::station_number::station_number;

pub const REGION_KEY_LEN: usize = 7;

/// Data-quality patches: region keys derived from the roster that do not
/// match what result pages use, as `(roster key, result-page key)`.
/// Samara and Ingushetia carry malformed ids in the roster.
pub const REGION_KEY_OVERRIDES: [(&str, &str); 2] = [
    ("1001000", "2632000"), // Samara
    ("2062001", "2062000"), // Ingushetia
];

/// Leading digits of an id that identify its region.
pub fn region_key(id: &str) -> String {
    id.chars().take(REGION_KEY_LEN).collect()
}

/// Region key → region name, built from station commissions' region ancestors.
#[derive(Debug, Clone, Default)]
pub struct RegionIndex {
    by_key: HashMap<String, String>,
}

impl RegionIndex {
    pub fn from_stations<'a>(stations: impl IntoIterator<Item = &'a CommissionNode>) -> Self {
        let mut by_key: HashMap<String, String> = HashMap::new();
        for station in stations {
            let (Some(region), Some(external_id)) = (
                station.region.as_ref(),
                station.region_commission().and_then(|rc| rc.external_id),
            ) else {
                continue;
            };
            let key = region_key(&external_id.to_string());
            if let Some(previous) = by_key.insert(key.clone(), region.clone()) {
                if &previous != region {
                    warn!(
                        "Region key {} maps to both '{}' and '{}'; keeping '{}'",
                        key, previous, region, region
                    );
                }
            }
        }
        for (wrong, right) in REGION_KEY_OVERRIDES {
            if let Some(region) = by_key.remove(wrong) {
                debug!("Region key override {} -> {} ('{}')", wrong, right, region);
                by_key.insert(right.to_string(), region);
            }
        }
        Self { by_key }
    }

    /// Region name for a result-page record id.
    pub fn region_for(&self, record_id: &str) -> Option<&str> {
        self.by_key.get(&region_key(record_id)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Result cells gathered per `(region, station column label)`.
#[derive(Debug, Clone, Default)]
pub struct CellGroups {
    groups: HashMap<(String, String), HashMap<Feature, u64>>,
}

impl CellGroups {
    /// Groups cells by their region and column label. A record id whose
    /// region key is unknown to the roster is fatal.
    pub fn collect(
        cells: impl IntoIterator<Item = ResultCell>,
        regions: &RegionIndex,
    ) -> Result<Self, StructuralError> {
        let mut groups: HashMap<(String, String), HashMap<Feature, u64>> = HashMap::new();
        for cell in cells {
            let region = regions.region_for(&cell.record_id).ok_or_else(|| {
                StructuralError::UnknownRegionKey {
                    region_key: region_key(&cell.record_id),
                    record_id: cell.record_id.clone(),
                }
            })?;
            groups
                .entry((region.to_string(), cell.station_label))
                .or_default()
                .insert(cell.feature, cell.value);
        }
        Ok(Self { groups })
    }

    pub fn get(&self, region: &str, label: &str) -> Option<&HashMap<Feature, u64>> {
        self.groups.get(&(region.to_string(), label.to_string()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// What the join left out, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub stations: usize,
    pub stations_without_region: usize,
    pub stations_without_parent: usize,
    pub unnumbered_stations: usize,
    pub duplicate_station_keys: usize,
    pub cell_groups: usize,
    pub unnumbered_columns: usize,
    pub duplicate_column_keys: usize,
    pub matched: usize,
    pub unmatched_stations: usize,
    pub unmatched_groups: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub records: Vec<PollingStationRecord>,
    pub report: ReconcileReport,
}

/// Inner join of station commissions with result cells on
/// `(region, station number)`.
///
/// Stations or cell groups without a counterpart are dropped and counted.
/// A matched group that lacks any required feature is fatal.
pub fn reconcile(
    stations: Vec<CommissionNode>,
    cells: impl IntoIterator<Item = ResultCell>,
) -> Result<Reconciliation, StructuralError> {
    let mut report = ReconcileReport {
        stations: stations.len(),
        ..ReconcileReport::default()
    };

    let regions = RegionIndex::from_stations(&stations);
    let groups = CellGroups::collect(cells, &regions)?;
    report.cell_groups = groups.len();

    let mut numbered_groups: HashMap<(String, u64), &HashMap<Feature, u64>> = HashMap::new();
    for ((region, label), features) in &groups.groups {
        let Some(number) = station_number(label) else {
            debug!("Column '{}' in '{}' carries no station number", label, region);
            report.unnumbered_columns += 1;
            continue;
        };
        if numbered_groups.insert((region.clone(), number), features).is_some() {
            warn!("Several columns in '{}' read as station {}", region, number);
            report.duplicate_column_keys += 1;
        }
    }

    let mut by_key: BTreeMap<(String, u64), (Arc<CommissionNode>, Option<Address>)> =
        BTreeMap::new();
    for station in stations {
        let CommissionNode {
            name,
            region,
            address,
            parent,
            ..
        } = station;
        let Some(region) = region else {
            report.stations_without_region += 1;
            continue;
        };
        let Some(parent) = parent else {
            report.stations_without_parent += 1;
            continue;
        };
        let Some(number) = name.as_deref().and_then(station_number) else {
            debug!("No station number in {:?}", name);
            report.unnumbered_stations += 1;
            continue;
        };
        if by_key.insert((region.clone(), number), (parent, address)).is_some() {
            warn!(
                "Station {} in '{}' listed more than once; keeping the later row",
                number, region
            );
            report.duplicate_station_keys += 1;
        }
    }

    let mut records = Vec::new();
    for ((region, number), (parent, address)) in by_key {
        match numbered_groups.get(&(region.clone(), number)) {
            Some(features) => {
                let stats = station_stats(&region, number, features)?;
                records.push(PollingStationRecord {
                    region,
                    station_number: number,
                    parent,
                    address,
                    stats,
                });
            }
            None => report.unmatched_stations += 1,
        }
    }
    report.matched = records.len();
    report.unmatched_groups = numbered_groups.len() - report.matched;

    info!(
        "Reconciled {} stations ({} roster stations, {} cell groups; dropped: {} unnumbered, {} without results, {} result groups without station)",
        report.matched,
        report.stations,
        report.cell_groups,
        report.unnumbered_stations,
        report.unmatched_stations,
        report.unmatched_groups
    );
    Ok(Reconciliation { records, report })
}

// Copies every required feature out of a matched group.
fn station_stats(
    region: &str,
    number: u64,
    features: &HashMap<Feature, u64>,
) -> Result<StationStats, StructuralError> {
    let protocol = Feature::required()
        .map(|feature| {
            features
                .get(&feature)
                .map(|value| (feature, *value))
                .ok_or_else(|| StructuralError::MissingFeature {
                    region: region.to_string(),
                    number,
                    feature: feature.label(),
                })
        })
        .collect::<Result<BTreeMap<Feature, u64>, _>>()?;

    let count = |feature: Feature| protocol.get(&feature).copied().unwrap_or_default();
    Ok(StationStats {
        registered_voters: count(Feature::VotersRegistered),
        ballots_issued: count(Feature::BallotsReceived),
        valid_ballots: count(Feature::ValidBallots),
        votes: VoteTally {
            spravedlivaya_rossiya: count(Feature::SpravedlivayaRossiya),
            ldpr: count(Feature::Ldpr),
            patrioty_rossii: count(Feature::PatriotyRossii),
            kprf: count(Feature::Kprf),
            yabloko: count(Feature::Yabloko),
            edinaya_rossiya: count(Feature::EdinayaRossiya),
            pravo: count(Feature::Pravo),
        },
        protocol,
    })
}
