use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::feature_schema::Feature;

/// One scraped count for one station column on one result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCell {
    pub record_id: String, // digits of the page's `vibid`
    pub feature: Feature,
    pub station_label: String, // header text of the station column
    pub value: u64,
}

/// Commission tier in the roster (`type_ik` column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommissionLevel {
    Region,
    Territorial,
    Station,
}

impl CommissionLevel {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "ik" => Some(Self::Region),
            "tik" => Some(Self::Territorial),
            "uik" => Some(Self::Station),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Region => "ik",
            Self::Territorial => "tik",
            Self::Station => "uik",
        }
    }
}

impl fmt::Display for CommissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Roster row as read, before hierarchy resolution. Any column may be blank.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCommissionRecord {
    pub id: Option<i64>,
    pub external_id: Option<i64>, // `iz_id`, the election system's own id
    pub parent_id: Option<i64>,
    pub level: Option<CommissionLevel>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

/// Free-text address; unresolved addresses keep `coordinates: None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub text: String,
    pub coordinates: Option<Coordinates>,
}

/// Commission with its parent chain resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionNode {
    pub external_id: Option<i64>,
    pub level: CommissionLevel,
    pub name: Option<String>,
    pub region: Option<String>,
    pub address: Option<Address>,
    pub parent: Option<Arc<CommissionNode>>,
}

impl CommissionNode {
    pub fn parent(&self) -> Option<&CommissionNode> {
        self.parent.as_deref()
    }

    /// The region commission two levels up from a station commission.
    pub fn region_commission(&self) -> Option<&CommissionNode> {
        self.parent()?.parent()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteTally {
    pub spravedlivaya_rossiya: u64,
    pub ldpr: u64,
    pub patrioty_rossii: u64,
    pub kprf: u64,
    pub yabloko: u64,
    pub edinaya_rossiya: u64,
    pub pravo: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationStats {
    pub registered_voters: u64,
    pub ballots_issued: u64, // ballots handed to the station commission
    pub valid_ballots: u64,
    pub votes: VoteTally,
    pub protocol: BTreeMap<Feature, u64>, // every required feature, verbatim
}

/// Final joined record: one polling station with its results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollingStationRecord {
    pub region: String,
    pub station_number: u64,
    pub parent: Arc<CommissionNode>, // territorial commission
    pub address: Option<Address>,
    pub stats: StationStats,
}

/// Anchor to a child result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub text: String,
}
