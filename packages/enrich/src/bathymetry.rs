//! Bathymetry stage (`bathy_m` by default).

use std::path::{Path, PathBuf};

use shark_env_features::{BATHYMETRY_KEY, FeatureCollection, load_collection, write_collection};
use shark_env_raster::GeoRaster;

use crate::{EnrichError, EnrichStats, ProgressCallback};

/// Default raster path.
pub const DEFAULT_RASTER: &str = "data/env/gebco_bathymetry.tif";

/// Tunables for the bathymetry stage.
#[derive(Debug, Clone)]
pub struct BathymetryOptions {
    /// GeoTIFF to sample.
    pub raster: PathBuf,
    /// Property the sampled value is written to.
    pub property: String,
    /// Overrides the raster's own no-data sentinel when set.
    pub nodata: Option<f64>,
}

impl Default for BathymetryOptions {
    fn default() -> Self {
        Self {
            raster: PathBuf::from(DEFAULT_RASTER),
            property: BATHYMETRY_KEY.to_string(),
            nodata: None,
        }
    }
}

/// Writes the raster value under `property` for every feature with valid
/// coordinates. Points outside the raster or on no-data get `null`.
pub fn enrich_collection(
    collection: &mut FeatureCollection,
    raster: &mut GeoRaster,
    property: &str,
    progress: &dyn ProgressCallback,
) -> EnrichStats {
    let mut stats = EnrichStats::new(collection.len());
    progress.set_total(collection.len() as u64);

    for feature in &mut collection.features {
        progress.inc(1);

        let Some((lon, lat)) = feature.valid_lon_lat() else {
            stats.skip();
            continue;
        };

        let value = raster.sample(lon, lat);
        feature.set_property(property, value);
        stats.record(value.is_some());
    }

    progress.finish(format!(
        "{property}: {} of {} points",
        stats.with_value, stats.total
    ));
    stats
}

/// Loads `src`, samples the raster for each feature, and writes `dst`.
///
/// The raster is opened before any output is written and closed when the
/// stage returns.
///
/// # Errors
///
/// Returns [`EnrichError`] if `src` or the raster cannot be opened, or
/// `dst` cannot be written.
pub fn run(
    src: &Path,
    dst: &Path,
    options: &BathymetryOptions,
    progress: &dyn ProgressCallback,
) -> Result<EnrichStats, EnrichError> {
    log::info!(
        "Bathymetry: {} -> {} (raster {})",
        src.display(),
        dst.display(),
        options.raster.display()
    );

    let mut collection = load_collection(src)?;

    let mut raster = GeoRaster::open(&options.raster)?;
    if options.nodata.is_some() {
        raster = raster.with_nodata(options.nodata);
    }

    let stats = enrich_collection(&mut collection, &mut raster, &options.property, progress);
    drop(raster);

    write_collection(dst, &collection)?;
    log::info!("Bathymetry done: +{} on {stats}", options.property);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use shark_env_features::PropertyValue;
    use tiff::encoder::{TiffEncoder, colortype};
    use tiff::tags::Tag;

    use super::*;
    use crate::NullProgress;
    use crate::test_support::{collection, point, short_point};

    /// 2x2 raster over lon [-82, -80], lat [24, 26] with depths
    /// `[-10, -20; -30, -9999]` (row 0 is the northern row).
    fn write_raster(path: &Path) {
        let file = File::create(path).unwrap();
        let mut tiff = TiffEncoder::new(file).unwrap();
        let mut image = tiff.new_image::<colortype::Gray32Float>(2, 2).unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[1.0_f64, 1.0, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(
                Tag::ModelTiepointTag,
                &[0.0_f64, 0.0, 0.0, -82.0, 26.0, 0.0][..],
            )
            .unwrap();
        image.encoder().write_tag(Tag::GdalNodata, "-9999").unwrap();
        image
            .write_data(&[-10.0_f32, -20.0, -30.0, -9999.0])
            .unwrap();
    }

    fn fixtures() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let raster = dir.path().join("bathy.tif");
        write_raster(&raster);
        (dir, raster)
    }

    #[test]
    fn samples_points_and_writes_null_outside() {
        let (_dir, raster_path) = fixtures();
        let mut raster = GeoRaster::open(&raster_path).unwrap();

        let mut points = collection(vec![
            point(-81.5, 25.5, &[]),
            point(-80.5, 24.5, &[]),
            point(-70.0, 25.0, &[]),
            point(0.0, 0.0, &[]),
            short_point(),
        ]);

        let stats = enrich_collection(&mut points, &mut raster, BATHYMETRY_KEY, &NullProgress);

        let f = &points.features;
        assert_eq!(f[0].property(BATHYMETRY_KEY), Some(&PropertyValue::Float(-10.0)));
        assert_eq!(f[1].property(BATHYMETRY_KEY), Some(&PropertyValue::Null));
        assert_eq!(f[2].property(BATHYMETRY_KEY), Some(&PropertyValue::Null));
        assert!(!f[3].has_property(BATHYMETRY_KEY));
        assert!(!f[4].has_property(BATHYMETRY_KEY));
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.with_value, 1);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn run_uses_custom_property_and_nodata() {
        let (dir, raster_path) = fixtures();
        let src = dir.path().join("in.geojson");
        let dst = dir.path().join("out/bathy.geojson");
        write_collection(
            &src,
            &collection(vec![point(-81.5, 24.5, &[]), point(-80.5, 24.5, &[])]),
        )
        .unwrap();

        let options = BathymetryOptions {
            raster: raster_path,
            property: "depth".to_string(),
            nodata: Some(-30.0),
        };
        let stats = run(&src, &dst, &options, &NullProgress).unwrap();

        let written = load_collection(&dst).unwrap();
        assert_eq!(written.features[0].property("depth"), Some(&PropertyValue::Null));
        assert_eq!(
            written.features[1].property("depth"),
            Some(&PropertyValue::Float(-9999.0))
        );
        assert_eq!(stats.with_value, 1);
    }

    #[test]
    fn missing_raster_is_fatal_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.geojson");
        let dst = dir.path().join("out.geojson");
        write_collection(&src, &collection(vec![point(-81.5, 25.5, &[])])).unwrap();

        let options = BathymetryOptions {
            raster: dir.path().join("missing.tif"),
            ..BathymetryOptions::default()
        };

        assert!(matches!(
            run(&src, &dst, &options, &NullProgress),
            Err(EnrichError::Raster(_))
        ));
        assert!(!dst.exists());
    }
}
