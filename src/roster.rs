// roster.rs
//! Commission roster loading and hierarchy resolution.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::error::StructuralError;
use crate::models::{Address, CommissionLevel, CommissionNode, Coordinates, RawCommissionRecord};

#[derive(Debug, Deserialize)]
struct RosterRow {
    id: Option<String>,
    iz_id: Option<String>,
    parent_id: Option<String>,
    name: Option<String>,
    region: Option<String>,
    address: Option<String>,
    type_ik: Option<String>,
}

/// Reads the whole roster CSV into memory.
pub fn load_roster(path: &Path) -> Result<Vec<RawCommissionRecord>> {
    info!("Loading commission roster from {:?}", path);
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open roster {:?}", path))?;
    let records = read_roster(file).with_context(|| format!("Failed to read roster {:?}", path))?;
    info!("Loaded {} roster rows", records.len());
    Ok(records)
}

pub fn read_roster<R: Read>(reader: R) -> Result<Vec<RawCommissionRecord>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for (index, row) in csv.deserialize::<RosterRow>().enumerate() {
        let line = index + 2; // header is line 1
        let row = row.with_context(|| format!("Malformed roster row at line {}", line))?;
        let parse = |column: &str, value: &Option<String>| {
            parse_id(value.as_deref())
                .with_context(|| format!("Roster line {}: bad {} {:?}", line, column, value))
        };
        records.push(RawCommissionRecord {
            id: parse("id", &row.id)?,
            external_id: parse("iz_id", &row.iz_id)?,
            parent_id: parse("parent_id", &row.parent_id)?,
            level: row.type_ik.as_deref().and_then(CommissionLevel::from_code),
            name: non_blank(row.name),
            region: non_blank(row.region),
            address: non_blank(row.address),
        });
    }
    Ok(records)
}

// Numeric columns come out of spreadsheet exports as "123" or "123.0".
fn parse_id(value: Option<&str>) -> Result<Option<i64>> {
    let Some(text) = value.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if let Ok(id) = text.parse::<i64>() {
        return Ok(Some(id));
    }
    let float: f64 = text
        .parse()
        .map_err(|_| anyhow!("'{}' is not a numeric id", text))?;
    if float.fract() != 0.0 || !float.is_finite() || float.abs() > i64::MAX as f64 {
        return Err(anyhow!("'{}' is not an integral id", text));
    }
    Ok(Some(float as i64))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Distinct non-empty addresses in roster order, for geocoding.
pub fn roster_addresses(records: &[RawCommissionRecord]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    records
        .iter()
        .filter_map(|r| r.address.clone())
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

/// Links station commissions to their territorial and region commissions.
///
/// Rows are bucketed by level and internal id, then each territorial row's
/// parent is looked up among region rows and each station row's parent among
/// territorial rows. A parent id that is not found is fatal. Returns the
/// station commissions in id order; higher levels survive only as parents.
pub fn build_commission_tree(
    records: impl IntoIterator<Item = RawCommissionRecord>,
    coordinates: &HashMap<String, Coordinates>,
) -> Result<Vec<CommissionNode>, StructuralError> {
    let mut buckets: HashMap<CommissionLevel, BTreeMap<i64, RawCommissionRecord>> = HashMap::new();
    let mut skipped = 0usize;
    for record in records {
        let (Some(id), Some(level)) = (record.id, record.level) else {
            skipped += 1;
            continue;
        };
        if buckets.entry(level).or_default().insert(id, record).is_some() {
            warn!("Duplicate {} commission id {}; keeping the later row", level, id);
        }
    }
    if skipped > 0 {
        debug!("Ignored {} roster rows without an id or known level", skipped);
    }

    let regions: HashMap<i64, Arc<CommissionNode>> = buckets
        .remove(&CommissionLevel::Region)
        .unwrap_or_default()
        .into_iter()
        .map(|(id, record)| {
            let node = make_node(record, CommissionLevel::Region, coordinates, None);
            (id, Arc::new(node))
        })
        .collect();

    let territorials = link_level(
        buckets.remove(&CommissionLevel::Territorial).unwrap_or_default(),
        &regions,
        CommissionLevel::Territorial,
        CommissionLevel::Region,
        coordinates,
    )?
    .into_iter()
    .map(|(id, node)| (id, Arc::new(node)))
    .collect::<HashMap<_, _>>();

    let stations: Vec<CommissionNode> = link_level(
        buckets.remove(&CommissionLevel::Station).unwrap_or_default(),
        &territorials,
        CommissionLevel::Station,
        CommissionLevel::Territorial,
        coordinates,
    )?
    .into_iter()
    .map(|(_, node)| node)
    .collect();

    info!(
        "Built commission tree: {} region, {} territorial, {} station commissions",
        regions.len(),
        territorials.len(),
        stations.len()
    );
    Ok(stations)
}

fn link_level(
    bucket: BTreeMap<i64, RawCommissionRecord>,
    parents: &HashMap<i64, Arc<CommissionNode>>,
    level: CommissionLevel,
    parent_level: CommissionLevel,
    coordinates: &HashMap<String, Coordinates>,
) -> Result<Vec<(i64, CommissionNode)>, StructuralError> {
    bucket
        .into_iter()
        .map(|(id, record)| {
            let parent = record
                .parent_id
                .and_then(|pid| parents.get(&pid))
                .cloned()
                .ok_or(StructuralError::MissingParent {
                    level,
                    parent_level,
                    id,
                    parent_id: record.parent_id,
                })?;
            Ok((id, make_node(record, level, coordinates, Some(parent))))
        })
        .collect()
}

fn make_node(
    record: RawCommissionRecord,
    level: CommissionLevel,
    coordinates: &HashMap<String, Coordinates>,
    parent: Option<Arc<CommissionNode>>,
) -> CommissionNode {
    let address = record.address.map(|text| Address {
        coordinates: coordinates.get(&text).copied(),
        text,
    });
    CommissionNode {
        external_id: record.external_id,
        level,
        name: record.name,
        region: record.region,
        address,
        parent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        id: i64,
        iz: i64,
        parent: Option<i64>,
        level: CommissionLevel,
        name: &str,
    ) -> RawCommissionRecord {
        RawCommissionRecord {
            id: Some(id),
            external_id: Some(iz),
            parent_id: parent,
            level: Some(level),
            name: Some(name.to_string()),
            region: Some("Кировская область".to_string()),
            address: Some(format!("{} address", name)),
        }
    }

    #[test]
    fn reads_csv_with_float_ids_and_blanks() {
        let csv = "id,iz_id,reserve_iz_id,parent_id,name,region,address,type_ik\n\
                   1.0,4434000.0,,,Избирательная комиссия,Кировская область,,ik\n\
                   2,4434001,,1,ТИК Ленинская,Кировская область,\"г. Киров, ул. Ленина, 1\",tik\n\
                   3,,,2,УИК №57,Кировская область,,uik\n\
                   4,,,2,Something else,Кировская область,,oik\n";
        let records = read_roster(csv.as_bytes()).unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].id, Some(1));
        assert_eq!(records[0].external_id, Some(4434000));
        assert_eq!(records[0].parent_id, None);
        assert_eq!(records[0].address, None);
        assert_eq!(records[1].address.as_deref(), Some("г. Киров, ул. Ленина, 1"));
        assert_eq!(records[2].level, Some(CommissionLevel::Station));
        assert_eq!(records[2].external_id, None);
        assert_eq!(records[3].level, None);
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let csv = "id,iz_id,parent_id,name,region,address,type_ik\nabc,,,x,y,z,uik\n";
        assert!(read_roster(csv.as_bytes()).is_err());
        let csv = "id,iz_id,parent_id,name,region,address,type_ik\n1.5,,,x,y,z,uik\n";
        assert!(read_roster(csv.as_bytes()).is_err());
    }

    #[test]
    fn stations_get_two_ancestors() {
        let records = vec![
            record(3, 300, Some(2), CommissionLevel::Station, "УИК №57"),
            record(1, 100, None, CommissionLevel::Region, "ИК"),
            record(2, 200, Some(1), CommissionLevel::Territorial, "ТИК"),
            record(4, 400, Some(2), CommissionLevel::Station, "УИК №58"),
        ];
        let mut coordinates = HashMap::new();
        coordinates.insert(
            "УИК №57 address".to_string(),
            Coordinates { longitude: 49.66, latitude: 58.6 },
        );

        let stations = build_commission_tree(records, &coordinates).unwrap();

        assert_eq!(stations.len(), 2);
        let first = &stations[0];
        assert_eq!(first.name.as_deref(), Some("УИК №57"));
        assert_eq!(first.parent().unwrap().external_id, Some(200));
        assert_eq!(first.region_commission().unwrap().external_id, Some(100));
        assert!(first.region_commission().unwrap().parent.is_none());
        assert_eq!(
            first.address.as_ref().unwrap().coordinates,
            Some(Coordinates { longitude: 49.66, latitude: 58.6 })
        );
        assert_eq!(stations[1].address.as_ref().unwrap().coordinates, None);
        assert!(Arc::ptr_eq(
            stations[0].parent.as_ref().unwrap(),
            stations[1].parent.as_ref().unwrap()
        ));
    }

    #[test]
    fn unknown_parent_is_fatal() {
        let records = vec![
            record(1, 100, None, CommissionLevel::Region, "ИК"),
            record(2, 200, Some(1), CommissionLevel::Territorial, "ТИК"),
            record(3, 300, Some(99), CommissionLevel::Station, "УИК №1"),
        ];
        let err = build_commission_tree(records, &HashMap::new()).unwrap_err();
        assert!(matches!(
            err,
            StructuralError::MissingParent {
                level: CommissionLevel::Station,
                id: 3,
                parent_id: Some(99),
                ..
            }
        ));

        let orphan_tik = vec![record(2, 200, None, CommissionLevel::Territorial, "ТИК")];
        assert!(matches!(
            build_commission_tree(orphan_tik, &HashMap::new()),
            Err(StructuralError::MissingParent {
                level: CommissionLevel::Territorial,
                parent_id: None,
                ..
            })
        ));
    }

    #[test]
    fn addresses_are_deduplicated() {
        let mut records = vec![
            record(1, 100, None, CommissionLevel::Region, "a"),
            record(2, 200, Some(1), CommissionLevel::Territorial, "a"),
        ];
        records[1].address = Some("a address".to_string());
        records.push(RawCommissionRecord { address: None, ..records[0].clone() });
        assert_eq!(roster_addresses(&records), vec!["a address".to_string()]);
    }
}
