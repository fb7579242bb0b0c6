#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Point feature types shared by every stage of the enrichment pipeline.
//!
//! A [`FeatureCollection`] is read once per stage, mapped 1:1 over its
//! [`Feature`]s, and written back. Property bags are typed as
//! [`Properties`] (string keys to [`PropertyValue`]) so covariates are
//! written as explicit scalars instead of arbitrary JSON.

pub mod date;
pub mod property;

use serde::{Deserialize, Serialize};

pub use date::{DATE_KEYS, observation_date};
pub use property::{Properties, PropertyValue};

/// Property key for sea-surface temperature in degrees Celsius.
pub const SST_KEY: &str = "sst_c";

/// Default property key for bathymetry in metres.
pub const BATHYMETRY_KEY: &str = "bathy_m";

/// Property key for geodesic distance to the nearest coastline in km.
pub const DIST_COAST_KEY: &str = "dist_coast_km";

/// Property key for the presence (1) / absence (0) label.
pub const PRESENCE_KEY: &str = "presence";

/// Discriminator for the `type` member of a feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    #[default]
    Feature,
}

/// Discriminator for the `type` member of a feature collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionType {
    #[default]
    FeatureCollection,
}

/// A single `GeoJSON` feature.
///
/// Members other than `type`, `id`, `geometry` and `properties` are kept
/// in [`Feature::foreign_members`] so they survive a read/write cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default)]
    pub kind: FeatureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Raw geometry object. Kept untyped so malformed or short coordinate
    /// arrays still load and pass through unchanged.
    #[serde(default)]
    pub geometry: Option<serde_json::Value>,
    #[serde(default)]
    pub properties: Option<Properties>,
    #[serde(flatten)]
    pub foreign_members: serde_json::Map<String, serde_json::Value>,
}

impl Feature {
    /// Builds a point feature at `(lon, lat)` with the given properties.
    #[must_use]
    pub fn point(lon: f64, lat: f64, properties: Properties) -> Self {
        Self {
            kind: FeatureType::Feature,
            id: None,
            geometry: Some(serde_json::json!({ "type": "Point", "coordinates": [lon, lat] })),
            properties: Some(properties),
            foreign_members: serde_json::Map::new(),
        }
    }

    /// Returns the first two coordinates of a `Point` geometry.
    ///
    /// `None` when the geometry is missing, not a point, or has fewer than
    /// two coordinates.
    #[must_use]
    pub fn lon_lat(&self) -> Option<(f64, f64)> {
        let geometry = self.geometry.as_ref()?;
        if geometry.get("type")?.as_str()? != "Point" {
            return None;
        }
        let coordinates = geometry.get("coordinates")?.as_array()?;
        match (coordinates.first(), coordinates.get(1)) {
            (Some(lon), Some(lat)) => Some((lon.as_f64()?, lat.as_f64()?)),
            _ => None,
        }
    }

    /// Like [`Feature::lon_lat`], but only returns coordinates that pass
    /// [`is_valid_coordinate`].
    #[must_use]
    pub fn valid_lon_lat(&self) -> Option<(f64, f64)> {
        self.lon_lat()
            .filter(|(lon, lat)| is_valid_coordinate(*lon, *lat))
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.as_ref()?.get(key)
    }

    /// Whether `key` is present in the property bag (even if its value is null).
    #[must_use]
    pub fn has_property(&self, key: &str) -> bool {
        self.property(key).is_some()
    }

    /// Inserts or replaces a property, creating the bag if it is `null`.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
    }
}

/// A `GeoJSON` feature collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default)]
    pub kind: CollectionType,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(flatten)]
    pub foreign_members: serde_json::Map<String, serde_json::Value>,
}

impl FeatureCollection {
    #[must_use]
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: CollectionType::FeatureCollection,
            features,
            foreign_members: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Sentinel-and-range check applied before sampling a point.
///
/// Rejects non-finite values, the `(0, 0)` placeholder many occurrence
/// exports use for "unknown", and anything outside
/// `[-180, 180] x [-90, 90]`.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn is_valid_coordinate(lon: f64, lat: f64) -> bool {
    if !lon.is_finite() || !lat.is_finite() {
        return false;
    }
    if lon == 0.0 && lat == 0.0 {
        return false;
    }
    (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_null_island_and_out_of_range() {
        assert!(!is_valid_coordinate(0.0, 0.0));
        assert!(!is_valid_coordinate(181.0, 10.0));
        assert!(!is_valid_coordinate(10.0, -90.5));
        assert!(!is_valid_coordinate(f64::NAN, 10.0));
        assert!(is_valid_coordinate(0.0, 10.0));
        assert!(is_valid_coordinate(-180.0, 90.0));
    }

    #[test]
    fn parses_feature_collection_and_keeps_foreign_members() {
        let json = serde_json::json!({
            "type": "FeatureCollection",
            "name": "sphyrna",
            "features": [
                {
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [-80.1, 25.7] },
                    "properties": { "species": "Sphyrna mokarran", "year": 2019, "depth": 12.5, "tags": ["a"] }
                },
                { "type": "Feature", "geometry": null, "properties": null }
            ]
        });
        let fc: FeatureCollection = serde_json::from_value(json).unwrap();

        assert_eq!(fc.len(), 2);
        assert_eq!(fc.foreign_members["name"], "sphyrna");
        assert_eq!(fc.features[0].lon_lat(), Some((-80.1, 25.7)));
        assert_eq!(
            fc.features[0].property("year"),
            Some(&PropertyValue::Integer(2019))
        );
        assert_eq!(
            fc.features[0].property("depth"),
            Some(&PropertyValue::Float(12.5))
        );
        assert!(matches!(
            fc.features[0].property("tags"),
            Some(PropertyValue::Json(_))
        ));
        assert_eq!(fc.features[1].lon_lat(), None);

        let back = serde_json::to_value(&fc).unwrap();
        assert_eq!(back["name"], "sphyrna");
        assert_eq!(back["features"][0]["properties"]["year"], 2019);
        assert!(back["features"][1]["geometry"].is_null());
    }

    #[test]
    fn short_coordinate_array_has_no_lon_lat() {
        let json = serde_json::json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [12.0] },
            "properties": {}
        });
        let feature: Feature = serde_json::from_value(json).unwrap();
        assert_eq!(feature.lon_lat(), None);
    }

    #[test]
    fn set_property_creates_missing_bag() {
        let mut feature = Feature::point(10.0, 10.0, Properties::new());
        feature.properties = None;

        feature.set_property(SST_KEY, None::<f64>);

        assert!(feature.has_property(SST_KEY));
        assert_eq!(feature.property(SST_KEY), Some(&PropertyValue::Null));
    }
}
