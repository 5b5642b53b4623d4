use crate::core::extract::FileGeometryExtractor;
use crate::core::manual::ManualGeometryBuilder;
use crate::core::search::SiteShapes;
use crate::domain::model::{CoordinatesType, SiteDetails, SiteGeometry};
use crate::domain::ports::ObjectStore;
use crate::utils::error::{Result, SiteGeoError};
use geojson::GeoJson;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedGeometry {
    Manual(SiteGeometry),
    /// Validated FeatureCollection taken from an uploaded file.
    File(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSite {
    pub site_index: usize,
    pub geometry: ResolvedGeometry,
}

impl ResolvedSite {
    pub fn geometries(&self) -> Result<Vec<geo::Geometry<f64>>> {
        match &self.geometry {
            ResolvedGeometry::Manual(geometry) => Ok(vec![geometry.to_geo()]),
            ResolvedGeometry::File(collection) => collection_geometries(collection),
        }
    }

    /// GeoJSON features for this site, each tagged with `siteIndex`.
    pub fn features(&self) -> Vec<Value> {
        let tag = |mut feature: Value| {
            if let Some(object) = feature.as_object_mut() {
                let properties = object.entry("properties").or_insert_with(|| json!({}));
                if !properties.is_object() {
                    *properties = json!({});
                }
                if let Some(properties) = properties.as_object_mut() {
                    properties.insert("siteIndex".to_string(), json!(self.site_index));
                }
            }
            feature
        };

        match &self.geometry {
            ResolvedGeometry::Manual(geometry) => vec![tag(json!({
                "type": "Feature",
                "properties": {},
                "geometry": geometry.to_geojson(),
            }))],
            ResolvedGeometry::File(collection) => collection
                .get("features")
                .and_then(Value::as_array)
                .map(|features| features.iter().cloned().map(tag).collect())
                .unwrap_or_default(),
        }
    }
}

/// Every non-null geometry of a Feature, FeatureCollection or bare geometry.
pub fn collection_geometries(value: &Value) -> Result<Vec<geo::Geometry<f64>>> {
    let geojson = GeoJson::from_json_value(value.clone())?;
    let geometries = match geojson {
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .filter_map(|feature| feature.geometry)
            .collect(),
        GeoJson::Feature(feature) => feature.geometry.into_iter().collect(),
        GeoJson::Geometry(geometry) => vec![geometry],
    };

    geometries
        .into_iter()
        .map(|geometry| geo::Geometry::<f64>::try_from(geometry.value).map_err(SiteGeoError::from))
        .collect()
}

/// Resolves sites to canonical geometry: manual entries are built in
/// process, uploaded files go through the extractor.
pub struct SiteGeometryResolver<S: ObjectStore> {
    builder: ManualGeometryBuilder,
    extractor: FileGeometryExtractor<S>,
}

impl<S: ObjectStore> SiteGeometryResolver<S> {
    pub fn new(builder: ManualGeometryBuilder, extractor: FileGeometryExtractor<S>) -> Self {
        Self { builder, extractor }
    }

    pub fn builder(&self) -> &ManualGeometryBuilder {
        &self.builder
    }

    /// Resolves one site. A file site that already carries `geoJson` is not
    /// extracted again; otherwise the extracted collection is stored on it.
    pub async fn resolve_site(&self, site_index: usize, site: &mut SiteDetails) -> Result<ResolvedSite> {
        let geometry = match site.kind()? {
            CoordinatesType::Coordinates => ResolvedGeometry::Manual(self.builder.build(site)?),
            CoordinatesType::File => {
                let collection = match &site.geo_json {
                    Some(existing) => existing.clone(),
                    None => {
                        let file = site.file.as_ref().ok_or_else(|| SiteGeoError::MissingCoordinates {
                            reason: format!("site {} is file based but has no file reference", site_index),
                        })?;
                        let collection = self.extractor.extract(file).await?;
                        site.geo_json = Some(collection.clone());
                        collection
                    }
                };
                ResolvedGeometry::File(collection)
            }
        };

        Ok(ResolvedSite {
            site_index,
            geometry,
        })
    }

    /// Resolves every site in order, stopping at the first failure.
    pub async fn resolve_all(&self, sites: &mut [SiteDetails]) -> Result<Vec<ResolvedSite>> {
        tracing::info!("Resolving geometry for {} sites", sites.len());
        let mut resolved = Vec::with_capacity(sites.len());
        for (index, site) in sites.iter_mut().enumerate() {
            let result = self.resolve_site(index, site).await;
            match result {
                Ok(site) => resolved.push(site),
                Err(e) => {
                    tracing::warn!("Site {} could not be resolved: {}", index, e);
                    return Err(e);
                }
            }
        }
        Ok(resolved)
    }
}

/// Search input for a batch of resolved sites. A site whose stored geometry
/// no longer converts is left out of the search, not the whole batch.
pub fn site_shapes(resolved: &[ResolvedSite]) -> Vec<SiteShapes> {
    resolved
        .iter()
        .filter_map(|site| match site.geometries() {
            Ok(geometries) => Some(SiteShapes {
                site_index: site.site_index,
                geometries,
            }),
            Err(e) => {
                tracing::warn!("Skipping site {} in area search: {}", site.site_index, e);
                None
            }
        })
        .collect()
}

/// One FeatureCollection holding the features of every resolved site.
pub fn feature_collection(resolved: &[ResolvedSite]) -> Value {
    let features: Vec<Value> = resolved.iter().flat_map(ResolvedSite::features).collect();
    json!({ "type": "FeatureCollection", "features": features })
}
