use crate::core::buffer::{buffer, BufferOptions};
use crate::domain::model::AreaMatch;
use crate::domain::ports::ReferenceAreaStore;
use crate::utils::error::Result;
use std::collections::{BTreeMap, HashSet};

/// The canonical geometries of one site, tagged with its position in the
/// application.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteShapes {
    pub site_index: usize,
    pub geometries: Vec<geo::Geometry<f64>>,
}

/// Buffers site geometry and asks a reference-area store which named areas
/// it touches.
///
/// Every geometry of every site is searched and the matches are unioned.
/// A geometry that cannot be buffered is logged and skipped; the rest of
/// the batch still runs. Store failures abort the search.
pub struct AreaSearch<R: ReferenceAreaStore> {
    store: R,
    options: BufferOptions,
}

impl<R: ReferenceAreaStore> AreaSearch<R> {
    pub fn new(store: R, options: BufferOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    /// Matching area names for a flat list of geometries.
    pub async fn search(&self, geometries: &[geo::Geometry<f64>], dataset: &str) -> Result<Vec<String>> {
        let sites = [SiteShapes {
            site_index: 0,
            geometries: geometries.to_vec(),
        }];
        let matches = self.search_sites(&sites, dataset).await?;
        Ok(matches.into_iter().map(|m| m.area_name).collect())
    }

    /// One [`AreaMatch`] per distinct area name, attributed to the first
    /// site that reached it.
    pub async fn search_sites(&self, sites: &[SiteShapes], dataset: &str) -> Result<Vec<AreaMatch>> {
        if self.store.is_empty(dataset).await? {
            tracing::info!("Reference dataset '{}' is empty, skipping search", dataset);
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        for site in sites {
            for (position, geometry) in site.geometries.iter().enumerate() {
                let envelope = match buffer(geometry, &self.options) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!(
                            "Skipping geometry {} of site {} in '{}' search: {}",
                            position,
                            site.site_index,
                            dataset,
                            e
                        );
                        continue;
                    }
                };

                let names = self
                    .store
                    .intersecting_names(dataset, &geo::Geometry::MultiPolygon(envelope))
                    .await?;
                for name in names {
                    if seen.insert(name.clone()) {
                        matches.push(AreaMatch {
                            site_index: site.site_index,
                            area_name: name,
                        });
                    }
                }
            }
        }

        tracing::debug!("Found {} areas in '{}'", matches.len(), dataset);
        Ok(matches)
    }

    /// Runs [`Self::search_sites`] against each dataset; each result list is
    /// deduplicated independently.
    pub async fn search_datasets(
        &self,
        sites: &[SiteShapes],
        datasets: &[String],
    ) -> Result<BTreeMap<String, Vec<AreaMatch>>> {
        let mut results = BTreeMap::new();
        for dataset in datasets {
            let matches = self.search_sites(sites, dataset).await?;
            results.insert(dataset.clone(), matches);
        }
        Ok(results)
    }
}
