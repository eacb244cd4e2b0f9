// crates/sd_forcing/src/variables.rs

//! Forcing variable catalogue
//!
//! Ten integrator inputs. Nine are streamed by the distributor; ground
//! temperature is always synthesized from a configured scalar.
//!
//! | distributor name | integrator key |
//! |------------------|----------------|
//! | thermal          | I_lw           |
//! | air_temp         | T_a            |
//! | vapor_pressure   | e_a            |
//! | wind_speed       | u              |
//! | net_solar        | S_n            |
//! | soil_temp        | T_g            |
//! | precip           | m_pp           |
//! | percent_snow     | percent_snow   |
//! | snow_density     | rho_snow       |
//! | precip_temp      | T_pp           |

use std::fmt;
use std::str::FromStr;

use crate::error::ForcingError;

/// Forcing variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ForcingVariable {
    /// Incoming thermal radiation
    Thermal,
    /// Air temperature
    AirTemp,
    /// Vapor pressure
    VaporPressure,
    /// Wind speed
    WindSpeed,
    /// Net solar radiation
    NetSolar,
    /// Soil (ground) temperature
    SoilTemp,
    /// Precipitation mass
    Precip,
    /// Fraction of precipitation falling as snow
    PercentSnow,
    /// Density of new snow
    SnowDensity,
    /// Precipitation temperature
    PrecipTemp,
}

impl ForcingVariable {
    /// All variables, integrator input order
    pub const ALL: [ForcingVariable; 10] = [
        Self::Thermal,
        Self::AirTemp,
        Self::VaporPressure,
        Self::WindSpeed,
        Self::NetSolar,
        Self::SoilTemp,
        Self::Precip,
        Self::PercentSnow,
        Self::SnowDensity,
        Self::PrecipTemp,
    ];

    /// Variables delivered by a forcing stream
    pub fn streamed() -> impl Iterator<Item = ForcingVariable> {
        Self::ALL.into_iter().filter(|v| v.is_streamed())
    }

    /// Distributor name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Thermal => "thermal",
            Self::AirTemp => "air_temp",
            Self::VaporPressure => "vapor_pressure",
            Self::WindSpeed => "wind_speed",
            Self::NetSolar => "net_solar",
            Self::SoilTemp => "soil_temp",
            Self::Precip => "precip",
            Self::PercentSnow => "percent_snow",
            Self::SnowDensity => "snow_density",
            Self::PrecipTemp => "precip_temp",
        }
    }

    /// Integrator input key
    pub fn integrator_key(&self) -> &'static str {
        match self {
            Self::Thermal => "I_lw",
            Self::AirTemp => "T_a",
            Self::VaporPressure => "e_a",
            Self::WindSpeed => "u",
            Self::NetSolar => "S_n",
            Self::SoilTemp => "T_g",
            Self::Precip => "m_pp",
            Self::PercentSnow => "percent_snow",
            Self::SnowDensity => "rho_snow",
            Self::PrecipTemp => "T_pp",
        }
    }

    /// Temperature-like input, shifted from °C to K on ingestion
    pub fn is_temperature(&self) -> bool {
        matches!(self, Self::AirTemp | Self::PrecipTemp | Self::SoilTemp)
    }

    /// Delivered by the stream rather than synthesized
    pub fn is_streamed(&self) -> bool {
        !matches!(self, Self::SoilTemp)
    }
}

impl fmt::Display for ForcingVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ForcingVariable {
    type Err = ForcingError;

    /// Accepts distributor names and integrator keys; `precip_mass` is an
    /// alias of `precip`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("precip_mass") {
            return Ok(Self::Precip);
        }
        Self::ALL
            .into_iter()
            .find(|v| {
                v.name().eq_ignore_ascii_case(trimmed) || v.integrator_key() == trimmed
            })
            .ok_or_else(|| ForcingError::UnknownVariable(trimmed.to_string()))
    }
}
