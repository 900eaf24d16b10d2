use crate::error::{CliError, Result};
use clap::{Parser, ValueEnum};
use clustered_map_lib::{
    Accessor, ControllerConfig, EdgePadding, ExpansionStrategy, IndexConfig, MatchPolicy, Region,
};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Clustered Map CLI - Replays viewport changes through the clustering controller
/// and prints every published snapshot as a JSON line
pub struct Settings {
    /// JSON file holding an array of items to cluster
    #[clap(short, long, value_name = "FILE", env = "CLUSTERED_MAP_DATA")]
    pub data: PathBuf,

    /// Dotted path to each item's coordinate
    #[clap(long, default_value = "location")]
    pub field_path: String,

    /// Map width in pixels
    #[clap(long, default_value = "1080")]
    pub width: f64,

    /// Map height in pixels
    #[clap(long, default_value = "1920")]
    pub height: f64,

    /// Lowest zoom level clusters are generated for
    #[clap(long, default_value = "0")]
    pub min_zoom: u8,

    /// Highest zoom level clusters are generated for
    #[clap(long, default_value = "20")]
    pub max_zoom: u8,

    /// Cluster radius in tile-extent units (default: map width / 22)
    #[clap(long)]
    pub radius: Option<f64>,

    /// Tile extent the radius is expressed in
    #[clap(long, default_value = "512")]
    pub extent: u32,

    /// JSON file holding an array of regions to replay in order
    #[clap(long, value_name = "FILE", conflicts_with = "region")]
    pub regions: Option<PathBuf>,

    /// Single region to show, as lat,lon,lat_delta,lon_delta
    #[clap(long, value_parser = parse_region, allow_hyphen_values = true)]
    pub region: Option<Region>,

    /// Maximum number of members fetched when a cluster is pressed
    #[clap(long, default_value = "100")]
    pub max_children: usize,

    /// Pixels kept free on each side when framing a pressed cluster
    #[clap(long, default_value = "50.0")]
    pub edge_padding: f64,

    /// How the region after a cluster press is computed
    #[clap(long, value_enum, default_value = "fit-to-children")]
    pub strategy: StrategyArg,

    /// How cluster ids are carried over between results
    #[clap(long, value_enum, default_value = "exclusive")]
    pub match_policy: MatchPolicyArg,

    /// Only report presses instead of framing the pressed cluster's members
    #[clap(long, default_value = "false")]
    pub no_framing: bool,

    /// Press the first cluster of the last snapshot and print the outcome
    #[clap(long, default_value = "false")]
    pub press_first: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    FitToChildren,
    ZoomToRegion,
}

impl From<StrategyArg> for ExpansionStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::FitToChildren => ExpansionStrategy::FitToChildren,
            StrategyArg::ZoomToRegion => ExpansionStrategy::ZoomToRegion,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicyArg {
    Exclusive,
    FirstMatch,
}

impl From<MatchPolicyArg> for MatchPolicy {
    fn from(value: MatchPolicyArg) -> Self {
        match value {
            MatchPolicyArg::Exclusive => MatchPolicy::Exclusive,
            MatchPolicyArg::FirstMatch => MatchPolicy::FirstMatch,
        }
    }
}

/// Parse `lat,lon,lat_delta,lon_delta`
pub fn parse_region(value: &str) -> Result<Region> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| CliError::InvalidRegion(value.to_string()))?;
    match parts.as_slice() {
        [latitude, longitude, latitude_delta, longitude_delta] => Ok(Region::new(
            *latitude,
            *longitude,
            *latitude_delta,
            *longitude_delta,
        )),
        _ => Err(CliError::InvalidRegion(value.to_string())),
    }
}

impl Settings {
    pub fn screen_size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    /// Controller configuration for JSON items
    pub fn controller_config(&self) -> ControllerConfig<Value> {
        let mut index = IndexConfig {
            extent: self.extent,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            accessor: Accessor::field_path(self.field_path.clone()),
            ..Default::default()
        }
        .with_screen_width(self.width);
        if let Some(radius) = self.radius {
            index.radius = radius;
        }

        ControllerConfig {
            index,
            cluster_press_max_children: self.max_children,
            edge_padding: EdgePadding::uniform(self.edge_padding),
            preserve_cluster_press_behavior: !self.no_framing,
            expansion_strategy: self.strategy.into(),
            match_policy: self.match_policy.into(),
        }
    }
}
