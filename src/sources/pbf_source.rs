//! Waste-disposal features from a local OSM PBF extract.

use anyhow::{Context, Result};
use geo::{Centroid, Coord, LineString, MultiPoint, Point, Polygon};
use hashbrown::{HashMap, HashSet};
use indicatif::{ProgressBar, ProgressStyle};
use osmpbfreader::{NodeId, OsmObj, OsmPbfReader, Tags, WayId};
use serde_json::Value;
use sled::Db;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tempfile::{Builder, TempDir};
use tracing::{info, warn};

use crate::error::SourceError;
use crate::normalize::RawRecord;

/// Tags marking a waste facility in OSM data
pub fn is_waste_feature(tags: &Tags) -> bool {
    tags.contains("landuse", "landfill")
        || tags.contains("amenity", "waste_transfer_station")
        || (tags.contains("amenity", "recycling") && tags.contains("recycling_type", "centre"))
        || (tags.contains("amenity", "waste_disposal") && !tags.contains("access", "private"))
}

/// On-disk node coordinate index for the ways we care about.
///
/// Node coordinates go to a sled tree in a temp dir so large extracts do not
/// have to fit in memory; way → node lists stay in memory.
pub struct WayCentroids {
    node_db: Db,
    way_nodes: HashMap<WayId, Vec<NodeId>>,
    _dir: TempDir,
}

impl WayCentroids {
    /// Two passes: find matching ways, then store the nodes they reference.
    pub fn build<R: Read + Seek>(reader: &mut OsmPbfReader<R>) -> Result<Self> {
        info!("Pass 1/2: finding waste-facility ways...");
        reader.rewind()?;

        let mut way_nodes = HashMap::new();
        let mut needed_nodes = HashSet::new();
        for obj in reader.iter() {
            if let OsmObj::Way(way) = obj? {
                if is_waste_feature(&way.tags) {
                    needed_nodes.extend(way.nodes.iter().copied());
                    way_nodes.insert(way.id, way.nodes);
                }
            }
        }
        info!(
            "Found {} ways referencing {} nodes",
            way_nodes.len(),
            needed_nodes.len()
        );

        info!("Pass 2/2: storing node coordinates...");
        reader.rewind()?;
        let dir = Builder::new().prefix("wastemap-nodes-").tempdir()?;
        let db = sled::open(dir.path())?;

        let mut stored = 0usize;
        for obj in reader.iter() {
            if let OsmObj::Node(node) = obj? {
                if needed_nodes.contains(&node.id) {
                    let mut value = [0u8; 16];
                    value[0..8].copy_from_slice(&node.lon().to_be_bytes());
                    value[8..16].copy_from_slice(&node.lat().to_be_bytes());
                    db.insert(node.id.0.to_be_bytes(), &value)?;
                    stored += 1;
                }
            }
        }
        db.flush()?;
        info!("Stored {} node coordinates", stored);

        Ok(Self {
            node_db: db,
            way_nodes,
            _dir: dir,
        })
    }

    fn node_coord(&self, id: NodeId) -> Option<Coord<f64>> {
        let bytes = self.node_db.get(id.0.to_be_bytes()).ok()??;
        let lon = f64::from_be_bytes(bytes.get(0..8)?.try_into().ok()?);
        let lat = f64::from_be_bytes(bytes.get(8..16)?.try_into().ok()?);
        Some(Coord { x: lon, y: lat })
    }

    /// Area centroid for closed ways, mean of nodes otherwise
    pub fn centroid(&self, way_id: WayId) -> Option<Point<f64>> {
        let coords: Vec<Coord<f64>> = self
            .way_nodes
            .get(&way_id)?
            .iter()
            .filter_map(|id| self.node_coord(*id))
            .collect();

        if coords.len() >= 4 && coords.first() == coords.last() {
            let polygon = Polygon::new(LineString::new(coords.clone()), vec![]);
            if let Some(point) = polygon.centroid() {
                return Some(point);
            }
        }
        let points: MultiPoint<f64> = coords.into_iter().map(Point::from).collect::<Vec<_>>().into();
        points.centroid()
    }
}

/// Read waste-facility nodes and ways from a local OSM PBF extract.
pub fn read_pbf(path: &Path, source: &str) -> Result<Vec<RawRecord>, SourceError> {
    info!("Reading OSM extract {}", path.display());
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = OsmPbfReader::new(BufReader::new(file));

    let centroids = WayCentroids::build(&mut reader)?;
    reader.rewind().context("Failed to rewind PBF reader")?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} objects ({per_sec})")
            .context("Invalid progress template")?,
    );

    let mut records = Vec::new();
    for obj in reader.iter() {
        pb.inc(1);
        let obj = match obj {
            Ok(obj) => obj,
            Err(e) => {
                warn!("Error reading OSM object: {}", e);
                continue;
            }
        };
        let record = match &obj {
            OsmObj::Node(node) if is_waste_feature(&node.tags) => {
                let mut record = record_from_tags(&node.tags, source, "node", node.id.0);
                record.insert("lat", Value::from(node.lat()));
                record.insert("lng", Value::from(node.lon()));
                record
            }
            OsmObj::Way(way) if is_waste_feature(&way.tags) => {
                let mut record = record_from_tags(&way.tags, source, "way", way.id.0);
                match centroids.centroid(way.id) {
                    Some(center) => {
                        record.insert("lat", Value::from(center.y()));
                        record.insert("lng", Value::from(center.x()));
                    }
                    None => warn!("Way {} has no resolvable nodes", way.id.0),
                }
                record
            }
            _ => continue,
        };
        records.push(record);
    }
    pb.finish_with_message("Extract read");

    if records.is_empty() {
        return Err(SourceError::NoUsableRows(path.to_path_buf()));
    }
    info!("Read {} waste features from {}", records.len(), path.display());
    Ok(records)
}

fn record_from_tags(tags: &Tags, source: &str, osm_type: &str, id: i64) -> RawRecord {
    let mut record = RawRecord::new(source);
    for (key, value) in tags.iter() {
        record.insert(key.as_str(), Value::String(value.to_string()));
    }
    record.insert(
        "osm_url",
        Value::String(format!("https://www.openstreetmap.org/{}/{}", osm_type, id)),
    );
    record
}
