// cell_store.rs
use anyhow::{anyhow, Context, Result};
use log::info;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::StructuralError;
use crate::feature_schema::FeatureSchema;
use crate::models::ResultCell;

// On disk a cell is `[record_id, schema_slot, station_label, value]`.
type StoredCell = (String, usize, String, u64);

/// Writes parsed cells as one JSON array, features encoded by schema slot.
pub fn dump_cells(path: &Path, cells: &[ResultCell], schema: &FeatureSchema) -> Result<()> {
    let stored = cells
        .iter()
        .map(|cell| {
            let slot = schema
                .position(cell.feature)
                .ok_or_else(|| anyhow!("Feature {:?} has no slot in the schema", cell.feature))?;
            Ok((cell.record_id.clone(), slot, cell.station_label.clone(), cell.value))
        })
        .collect::<Result<Vec<StoredCell>>>()?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create cells file {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &stored)
        .with_context(|| format!("Failed to write cells to {:?}", path))?;
    writer.flush()?;
    info!("Dumped {} cells to {:?}", stored.len(), path);
    Ok(())
}

/// Reads cells written by [`dump_cells`] with the same schema.
pub fn load_cells(path: &Path, schema: &FeatureSchema) -> Result<Vec<ResultCell>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open cells file {:?}", path))?;
    let stored: Vec<StoredCell> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse cells file {:?}", path))?;

    let cells = stored
        .into_iter()
        .map(|(record_id, slot, station_label, value)| {
            let feature = schema
                .slot(slot)
                .ok_or(StructuralError::UnknownFeatureSlot { index: slot })?;
            Ok(ResultCell {
                record_id,
                feature,
                station_label,
                value,
            })
        })
        .collect::<Result<Vec<_>, StructuralError>>()?;
    info!("Loaded {} cells from {:?}", cells.len(), path);
    Ok(cells)
}
