//! Region and district lookup built from the warehouse list.

use std::{collections::BTreeSet, fs, path::Path};

use thiserror::Error;

use crate::domain::{pricing, Warehouse};
use crate::util::assets;

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("bundled warehouse list is missing")]
    MissingAsset,
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid warehouse list: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default)]
pub struct ZoneDirectory {
    warehouses: Vec<Warehouse>,
}

impl ZoneDirectory {
    pub fn new(warehouses: Vec<Warehouse>) -> Self {
        Self { warehouses }
    }

    /// The list compiled into the binary.
    pub fn bundled() -> Result<Self, ZoneError> {
        let bytes = assets::warehouses_json().ok_or(ZoneError::MissingAsset)?;
        Self::from_slice(&bytes)
    }

    /// Load from `path` when given, otherwise the bundled list.
    pub fn load(path: Option<&Path>) -> Result<Self, ZoneError> {
        match path {
            Some(path) => {
                let bytes = fs::read(path).map_err(|source| ZoneError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                let directory = Self::from_slice(&bytes)?;
                tracing::info!(path = %path.display(), warehouses = directory.warehouses.len(), "loaded warehouse list");
                Ok(directory)
            }
            None => Self::bundled(),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ZoneError> {
        Ok(Self::new(serde_json::from_slice(bytes)?))
    }

    pub fn warehouses(&self) -> &[Warehouse] {
        &self.warehouses
    }

    /// Distinct regions, sorted.
    pub fn regions(&self) -> Vec<&str> {
        self.warehouses
            .iter()
            .map(|w| w.region.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Districts of `region` with an active warehouse, sorted.
    pub fn districts(&self, region: &str) -> Vec<&str> {
        self.warehouses
            .iter()
            .filter(|w| w.region == region && w.is_active())
            .map(|w| w.district.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn find(&self, district: &str) -> Option<&Warehouse> {
        self.warehouses
            .iter()
            .find(|w| w.district.eq_ignore_ascii_case(district.trim()))
    }

    pub fn is_serviceable(&self, district: &str) -> bool {
        self.find(district).map(Warehouse::is_active).unwrap_or(false)
    }

    pub fn same_zone(&self, origin_district: &str, destination_district: &str) -> bool {
        pricing::same_zone(origin_district, destination_district)
    }
}
