//! Projection locale métrique pour les distances et centroïdes
//!
//! Les coordonnées géographiques ne sont pas isotropes : toutes les distances
//! du moteur sont des distances euclidiennes planes, en mètres, dans un
//! système projeté unique (par défaut WGS 84 / UTM 17N, EPSG:32617).
//!
//! - Zones UTM WGS84 (EPSG:326xx / 327xx) : Rust pur
//! - Autres EPSG : PROJ, avec la feature `reproject`

mod ellipsoid;
mod utm;

pub use utm::{geographic_to_utm, utm_to_geographic, UtmZone};

use geo::{Centroid, Geometry, Point};

use crate::types::MergedFeature;
use crate::FusionError;

/// Projection WGS84 <-> système métrique
pub enum Projector {
    /// Zone UTM (pure Rust)
    Utm(UtmZone),
    /// Projection via PROJ (si feature activée)
    #[cfg(feature = "reproject")]
    Proj(ProjPair),
}

impl Projector {
    /// Crée une projection vers l'EPSG métrique donné
    pub fn new(metric_epsg: u32) -> Result<Self, FusionError> {
        if let Some(zone) = UtmZone::from_epsg(metric_epsg) {
            return Ok(Self::Utm(zone));
        }

        #[cfg(feature = "reproject")]
        {
            return Ok(Self::Proj(ProjPair::new(metric_epsg)?));
        }

        #[cfg(not(feature = "reproject"))]
        Err(FusionError::invalid_config(format!(
            "EPSG:{} not supported without the 'reproject' feature (UTM zones 326xx/327xx only)",
            metric_epsg
        )))
    }

    /// WGS84 (lon, lat) -> mètres
    pub fn to_metric(&self, lon: f64, lat: f64) -> Result<(f64, f64), FusionError> {
        match self {
            Self::Utm(zone) => Ok(geographic_to_utm(lon, lat, *zone)),
            #[cfg(feature = "reproject")]
            Self::Proj(pair) => pair.forward(lon, lat),
        }
    }

    /// Mètres -> WGS84 (lon, lat)
    pub fn to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64), FusionError> {
        match self {
            Self::Utm(zone) => Ok(utm_to_geographic(x, y, *zone)),
            #[cfg(feature = "reproject")]
            Self::Proj(pair) => pair.inverse(x, y),
        }
    }

    /// Position projetée d'une géométrie (centroïde pour les lignes et surfaces)
    pub fn position(&self, geometry: &Geometry) -> Option<[f64; 2]> {
        let point = match geometry {
            Geometry::Point(p) => *p,
            other => other.centroid()?,
        };
        let (x, y) = self.to_metric(point.x(), point.y()).ok()?;
        Some([x, y])
    }

    /// Positions projetées de features
    pub fn positions_of(&self, features: &[MergedFeature]) -> Result<Vec<[f64; 2]>, FusionError> {
        features
            .iter()
            .map(|f| {
                self.position(&f.geometry)
                    .ok_or_else(|| FusionError::projection(f.key().to_string(), "no position"))
            })
            .collect()
    }

    /// Centroïde de positions projetées, ramené en WGS84
    pub fn centroid_of(&self, positions: &[[f64; 2]]) -> Result<Point, FusionError> {
        if positions.is_empty() {
            return Err(FusionError::projection("group", "empty group"));
        }
        let n = positions.len() as f64;
        let (sx, sy) = positions
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
        let (lon, lat) = self.to_geographic(sx / n, sy / n)?;
        Ok(Point::new(lon, lat))
    }

    /// Description de la projection utilisée
    pub fn description(&self) -> &'static str {
        match self {
            Self::Utm(_) => "utm (pure Rust)",
            #[cfg(feature = "reproject")]
            Self::Proj(_) => "proj (PROJ library)",
        }
    }
}

/// Couple de transformations PROJ aller / retour
#[cfg(feature = "reproject")]
pub struct ProjPair {
    forward: proj::Proj,
    inverse: proj::Proj,
}

#[cfg(feature = "reproject")]
impl ProjPair {
    fn new(metric_epsg: u32) -> Result<Self, FusionError> {
        let target = format!("EPSG:{}", metric_epsg);
        let forward = proj::Proj::new_known_crs("EPSG:4326", &target, None)
            .map_err(|e| FusionError::invalid_config(format!("{}: {}", target, e)))?;
        let inverse = proj::Proj::new_known_crs(&target, "EPSG:4326", None)
            .map_err(|e| FusionError::invalid_config(format!("{}: {}", target, e)))?;
        Ok(Self { forward, inverse })
    }

    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64), FusionError> {
        self.forward
            .convert((lon, lat))
            .map_err(|e| FusionError::projection(format!("({}, {})", lon, lat), e.to_string()))
    }

    fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64), FusionError> {
        self.inverse
            .convert((x, y))
            .map_err(|e| FusionError::projection(format!("({}, {})", x, y), e.to_string()))
    }
}
