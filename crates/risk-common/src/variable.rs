//! Registry of known climate variables.
//!
//! Only registered variables can be requested from the archive; the unit,
//! valid physical range and temporal reducer are fixed per variable so that
//! alignment and normalization never guess.

use serde::{Deserialize, Serialize};

/// How a variable is aggregated when resampled onto a coarser cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalReducer {
    /// Continuous quantities (temperature, wind, humidity).
    Mean,
    /// Accumulative quantities (precipitation, radiation).
    Sum,
}

/// A climate variable known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableId {
    Temperature2m,
    Dewpoint2m,
    WindU10,
    WindV10,
    SolarRadiation,
    TotalPrecipitation,
    SoilMoistureL1,
    LandSeaMask,
}

impl VariableId {
    /// All registered variables.
    pub const ALL: [VariableId; 8] = [
        VariableId::Temperature2m,
        VariableId::Dewpoint2m,
        VariableId::WindU10,
        VariableId::WindV10,
        VariableId::SolarRadiation,
        VariableId::TotalPrecipitation,
        VariableId::SoilMoistureL1,
        VariableId::LandSeaMask,
    ];

    /// Short name matching the archive's NetCDF variable naming.
    pub fn short_name(&self) -> &'static str {
        match self {
            VariableId::Temperature2m => "t2m",
            VariableId::Dewpoint2m => "d2m",
            VariableId::WindU10 => "u10",
            VariableId::WindV10 => "v10",
            VariableId::SolarRadiation => "ssrd",
            VariableId::TotalPrecipitation => "tp",
            VariableId::SoilMoistureL1 => "swvl1",
            VariableId::LandSeaMask => "lsm",
        }
    }

    /// Request name used by the archive API.
    pub fn archive_name(&self) -> &'static str {
        match self {
            VariableId::Temperature2m => "2m_temperature",
            VariableId::Dewpoint2m => "2m_dewpoint_temperature",
            VariableId::WindU10 => "10m_u_component_of_wind",
            VariableId::WindV10 => "10m_v_component_of_wind",
            VariableId::SolarRadiation => "surface_solar_radiation_downwards",
            VariableId::TotalPrecipitation => "total_precipitation",
            VariableId::SoilMoistureL1 => "volumetric_soil_water_layer_1",
            VariableId::LandSeaMask => "land_sea_mask",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            VariableId::Temperature2m | VariableId::Dewpoint2m => "K",
            VariableId::WindU10 | VariableId::WindV10 => "m s-1",
            VariableId::SolarRadiation => "J m-2",
            VariableId::TotalPrecipitation => "m",
            VariableId::SoilMoistureL1 => "m3 m-3",
            VariableId::LandSeaMask => "fraction",
        }
    }

    /// Valid physical range; values outside it are treated as missing.
    pub fn valid_range(&self) -> (f32, f32) {
        match self {
            VariableId::Temperature2m | VariableId::Dewpoint2m => (170.0, 340.0),
            VariableId::WindU10 | VariableId::WindV10 => (-120.0, 120.0),
            VariableId::SolarRadiation => (0.0, 5.0e7),
            VariableId::TotalPrecipitation => (0.0, 10.0),
            VariableId::SoilMoistureL1 => (0.0, 1.0),
            VariableId::LandSeaMask => (0.0, 1.0),
        }
    }

    /// Temporal reducer used when aggregating onto a coarser cadence.
    pub fn reducer(&self) -> TemporalReducer {
        match self {
            VariableId::SolarRadiation | VariableId::TotalPrecipitation => TemporalReducer::Sum,
            _ => TemporalReducer::Mean,
        }
    }

    /// Look up a variable by short name.
    pub fn from_short_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.short_name() == name)
    }
}

impl std::fmt::Display for VariableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}
