//! Feeds a dataset and a sequence of regions through the controller and
//! writes every published snapshot as one JSON line

use crate::error::{CliError, Result};
use crate::settings::Settings;
use clustered_map_lib::geo_math::region_from_points;
use clustered_map_lib::{
    BoundingBox, ClusterController, ClusterError, ClusterId, ControllerConfig, Dataset,
    LayoutChange, PressOutcome, Region,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::Write;
use std::path::Path;

/// Region shown when there is nothing to fit
const WORLD_REGION: Region = Region {
    latitude: 0.0,
    longitude: 0.0,
    latitude_delta: 85.0,
    longitude_delta: 180.0,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRecord<'a> {
    event: &'static str,
    region: Region,
    zoom: u8,
    generation: u64,
    bbox: Option<BoundingBox>,
    clusters: usize,
    leaves: usize,
    changed: bool,
    features: Vec<FeatureRecord<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum FeatureRecord<'a> {
    Cluster {
        id: ClusterId,
        longitude: f64,
        latitude: f64,
        #[serde(rename = "pointCount")]
        point_count: usize,
    },
    Leaf {
        longitude: f64,
        latitude: f64,
        item: Option<&'a Value>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PressRecord<'a> {
    event: &'static str,
    cluster_id: ClusterId,
    target_region: Option<Region>,
    members: Option<Vec<&'a Value>>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Load the files named in `settings` and replay them into `out`
pub fn run(settings: &Settings, out: &mut impl Write) -> Result<()> {
    let items: Vec<Value> = read_json(&settings.data)?;
    let regions: Vec<Region> = match (&settings.regions, settings.region) {
        (Some(path), _) => read_json(path)?,
        (None, Some(region)) => vec![region],
        (None, None) => Vec::new(),
    };
    tracing::info!(
        "Loaded {} items and {} regions from {}",
        items.len(),
        regions.len(),
        settings.data.display()
    );

    replay(
        settings.controller_config(),
        settings.screen_size(),
        items,
        &regions,
        settings.press_first,
        out,
    )
}

/// Region fitting every item of the dataset
fn fit_dataset(config: &ControllerConfig<Value>, dataset: &Dataset<Value>) -> Result<Region> {
    let accessor = config.index.accessor.resolve()?;
    let points = dataset
        .items()
        .iter()
        .map(|item| accessor.coordinate(item))
        .collect::<clustered_map_lib::Result<Vec<_>>>()?;
    match region_from_points(&points) {
        Ok(region) => Ok(region),
        Err(ClusterError::EmptyInput) => {
            tracing::warn!("Dataset is empty, showing the whole world");
            Ok(WORLD_REGION)
        }
        Err(e) => Err(e.into()),
    }
}

/// Build a controller for `items`, show the first region (or the dataset's
/// extent) and replay the remaining regions as region changes
pub fn replay(
    config: ControllerConfig<Value>,
    screen_size: (f64, f64),
    items: Vec<Value>,
    regions: &[Region],
    press_first: bool,
    out: &mut impl Write,
) -> Result<()> {
    #[cfg(feature = "profiling")]
    profiling::scope!("replay");

    let dataset = Dataset::new(items);
    let initial = match regions.first() {
        Some(region) => *region,
        None => fit_dataset(&config, &dataset)?,
    };

    let mut controller = ClusterController::new(config, initial, screen_size)?;
    let change = controller.set_dataset(dataset)?;
    write_snapshot(out, "dataset", &controller, change)?;

    for region in regions.iter().skip(1) {
        let change = controller.on_region_change(*region)?;
        write_snapshot(out, "region", &controller, change)?;
    }

    if press_first {
        let first = controller
            .snapshot()
            .clusters()
            .next()
            .and_then(|cluster| cluster.cluster_id);
        match first {
            Some(cluster_id) => {
                let outcome = controller.press_cluster(cluster_id)?;
                write_press(out, &outcome)?;
            }
            None => tracing::warn!("No cluster to press in the last snapshot"),
        }
    }

    Ok(())
}

fn write_snapshot(
    out: &mut impl Write,
    event: &'static str,
    controller: &ClusterController<Value>,
    change: LayoutChange,
) -> Result<()> {
    let snapshot = controller.snapshot();
    let features = snapshot
        .features
        .iter()
        .map(|feature| match feature.cluster_id {
            Some(id) if feature.is_cluster() => FeatureRecord::Cluster {
                id,
                longitude: feature.coordinate.x,
                latitude: feature.coordinate.y,
                point_count: feature.point_count,
            },
            _ => FeatureRecord::Leaf {
                longitude: feature.coordinate.x,
                latitude: feature.coordinate.y,
                item: feature.item.as_deref(),
            },
        })
        .collect();

    let record = SnapshotRecord {
        event,
        region: controller.region(),
        zoom: snapshot.zoom,
        generation: snapshot.generation,
        bbox: snapshot.bbox,
        clusters: snapshot.cluster_count(),
        leaves: snapshot.leaf_count(),
        changed: change.is_changed(),
        features,
    };
    serde_json::to_writer(&mut *out, &record)?;
    writeln!(out)?;
    Ok(())
}

fn write_press(out: &mut impl Write, outcome: &PressOutcome<Value>) -> Result<()> {
    let record = PressRecord {
        event: "press",
        cluster_id: outcome.cluster_id(),
        target_region: outcome.target_region().copied(),
        members: outcome
            .members()
            .map(|members| members.iter().map(|member| member.as_ref()).collect()),
    };
    serde_json::to_writer(&mut *out, &record)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items() -> Vec<Value> {
        vec![
            json!({ "name": "a", "location": { "latitude": 48.850, "longitude": 2.350 } }),
            json!({ "name": "b", "location": { "latitude": 48.851, "longitude": 2.351 } }),
            json!({ "name": "c", "location": { "latitude": 48.852, "longitude": 2.352 } }),
            json!({ "name": "d", "location": { "latitude": 40.416, "longitude": -3.703 } }),
        ]
    }

    fn lines(out: &[u8]) -> Vec<Value> {
        std::str::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_replay_prints_one_line_per_event() {
        let regions = [
            Region::new(45.0, 0.0, 10.0, 10.0),
            Region::new(48.851, 2.351, 0.01, 0.01),
            Region::new(0.0, 0.0, 10.0, 100.0),
        ];
        let mut out = Vec::new();
        replay(
            ControllerConfig::default(),
            (1080.0, 1920.0),
            items(),
            &regions,
            false,
            &mut out,
        )
        .unwrap();

        let records = lines(&out);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["event"], "dataset");
        assert_eq!(records[1]["event"], "region");
        assert_eq!(records[0]["generation"], 1);

        // Zoomed out: the Paris items form one cluster next to the Madrid leaf
        assert_eq!(records[0]["clusters"], 1);
        assert_eq!(records[0]["leaves"], 1);

        // Zoomed in: only the Paris items are in view, as leaves
        assert_eq!(records[1]["clusters"], 0);
        assert_eq!(records[1]["leaves"], 3);
        let names: Vec<&str> = records[1]["features"]
            .as_array()
            .unwrap()
            .iter()
            .inspect(|feature| assert_eq!(feature["kind"], "leaf"))
            .filter_map(|feature| feature["item"]["name"].as_str())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"a"));

        // Too wide to cluster: previous snapshot and region are kept
        assert_eq!(records[2]["changed"], false);
        assert_eq!(records[2]["region"], records[1]["region"]);
    }

    #[test]
    fn test_replay_fits_dataset_and_presses() {
        let mut out = Vec::new();
        replay(
            ControllerConfig::default(),
            (1080.0, 1920.0),
            items(),
            &[],
            true,
            &mut out,
        )
        .unwrap();

        let records = lines(&out);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["event"], "press");
        assert_eq!(records[1]["members"].as_array().map(Vec::len), Some(3));
        assert!(records[1]["targetRegion"]["latitudeDelta"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_replay_empty_dataset() {
        let mut out = Vec::new();
        replay(
            ControllerConfig::default(),
            (1080.0, 1920.0),
            Vec::new(),
            &[],
            true,
            &mut out,
        )
        .unwrap();
        let records = lines(&out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["features"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_replay_reports_bad_items() {
        let mut out = Vec::new();
        let result = replay(
            ControllerConfig::default(),
            (1080.0, 1920.0),
            vec![json!({ "name": "nowhere" })],
            &[Region::new(0.0, 0.0, 1.0, 1.0)],
            false,
            &mut out,
        );
        assert!(matches!(
            result,
            Err(CliError::Cluster(ClusterError::Configuration(_)))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let result: Result<Vec<Value>> = read_json(Path::new("/nonexistent/items.json"));
        assert!(matches!(result, Err(CliError::Read { .. })));
    }
}
