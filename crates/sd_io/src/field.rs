// crates/sd_io/src/field.rs

//! State field catalogue
//!
//! Names every grid of the snowpack state record. Each field has the
//! integrator key (`z_s`), an optional archive name (`thickness`) and a
//! stable one-byte id used by the binary output archive.

use std::fmt;
use std::str::FromStr;

use crate::error::IoError;

macro_rules! state_fields {
    ($( $variant:ident = $id:literal, $key:literal, $archive:expr, $doc:literal; )*) => {
        /// Field of the state record
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum StateField {
            $(
                #[doc = $doc]
                $variant,
            )*
        }

        impl StateField {
            /// Every field, id order
            pub const ALL: &'static [StateField] = &[$(StateField::$variant),*];

            /// Integrator key
            pub fn key(&self) -> &'static str {
                match self {
                    $(StateField::$variant => $key,)*
                }
            }

            /// Output archive name, when the field has one
            pub fn archive_name(&self) -> Option<&'static str> {
                match self {
                    $(StateField::$variant => $archive,)*
                }
            }

            /// Stable archive id
            pub fn id(&self) -> u8 {
                match self {
                    $(StateField::$variant => $id,)*
                }
            }

            /// Field from its archive id
            pub fn from_id(id: u8) -> Option<Self> {
                match id {
                    $($id => Some(StateField::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

state_fields! {
    Mask = 0, "mask", None, "Land mask (1 inside the domain)";
    Elevation = 1, "elevation", None, "Surface elevation";
    Z0 = 2, "z_0", None, "Surface roughness";
    Rho = 3, "rho", Some("snow_density"), "Snow density";
    TS0 = 4, "T_s_0", Some("temp_surf"), "Active layer temperature";
    TSL = 5, "T_s_l", Some("temp_lower"), "Lower layer temperature";
    TS = 6, "T_s", Some("temp_snowcover"), "Average snowcover temperature";
    CcS0 = 7, "cc_s_0", None, "Active layer cold content";
    CcSL = 8, "cc_s_l", None, "Lower layer cold content";
    CcS = 9, "cc_s", Some("cold_content"), "Snowcover cold content";
    MS = 10, "m_s", Some("specific_mass"), "Specific mass";
    MS0 = 11, "m_s_0", None, "Active layer specific mass";
    MSL = 12, "m_s_l", None, "Lower layer specific mass";
    ZS = 13, "z_s", Some("thickness"), "Snow depth";
    ZS0 = 14, "z_s_0", None, "Active layer depth";
    ZSL = 15, "z_s_l", Some("thickness_lower"), "Lower layer depth";
    H2oSat = 16, "h2o_sat", Some("water_saturation"), "Liquid water saturation";
    LayerCount = 17, "layer_count", None, "Number of snow layers";
    H2o = 18, "h2o", Some("liquid_water"), "Liquid water content";
    H2oMax = 19, "h2o_max", None, "Maximum liquid water content";
    H2oVol = 20, "h2o_vol", None, "Liquid water volume ratio";
    H2oTotal = 21, "h2o_total", None, "Total liquid water";
    RNBar = 22, "R_n_bar", Some("net_rad"), "Average net radiation";
    HBar = 23, "H_bar", Some("sensible_heat"), "Average sensible heat";
    LvEBar = 24, "L_v_E_bar", Some("latent_heat"), "Average latent heat";
    GBar = 25, "G_bar", Some("snow_soil"), "Average snow/soil heat exchange";
    G0Bar = 26, "G_0_bar", None, "Average active layer heat exchange";
    MBar = 27, "M_bar", Some("precip_advected"), "Average advected heat";
    DeltaQBar = 28, "delta_Q_bar", Some("sum_EB"), "Average energy balance";
    DeltaQ0Bar = 29, "delta_Q_0_bar", None, "Average active layer energy balance";
    ESSum = 30, "E_s_sum", Some("evaporation"), "Accumulated evaporation";
    MeltSum = 31, "melt_sum", Some("snowmelt"), "Accumulated melt";
    RoPredSum = 32, "ro_pred_sum", Some("SWI"), "Accumulated surface water input";
    CurrentTime = 33, "current_time", None, "Elapsed simulation time [s]";
    TimeSinceOut = 34, "time_since_out", None, "Time since last output [s]";
}

impl StateField {
    /// Geometry fields, never mutated after initialization
    pub const STATIC: [StateField; 3] = [StateField::Mask, StateField::Elevation, StateField::Z0];

    /// Fields every initial condition source must provide
    pub const INIT: [StateField; 6] = [
        StateField::ZS,
        StateField::Rho,
        StateField::TS0,
        StateField::TSL,
        StateField::TS,
        StateField::H2oSat,
    ];

    /// Snowpack temperatures
    pub const TEMPERATURES: [StateField; 3] = [StateField::TS0, StateField::TSL, StateField::TS];

    /// Geometry field
    pub fn is_static(&self) -> bool {
        Self::STATIC.contains(self)
    }

    /// Parse a list of names, duplicates removed, order kept
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<StateField>, IoError> {
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            let field: StateField = name.as_ref().parse()?;
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        Ok(fields)
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for StateField {
    type Err = IoError;

    /// Case-insensitive integrator key or archive name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| {
                f.key().eq_ignore_ascii_case(name)
                    || f.archive_name().map_or(false, |a| a.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| IoError::UnknownField(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_size_and_ids() {
        assert_eq!(StateField::ALL.len(), 35);
        for (i, field) in StateField::ALL.iter().enumerate() {
            assert_eq!(field.id() as usize, i);
            assert_eq!(StateField::from_id(field.id()), Some(*field));
        }
        assert_eq!(StateField::from_id(35), None);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("thickness".parse::<StateField>().unwrap(), StateField::ZS);
        assert_eq!("Z_S".parse::<StateField>().unwrap(), StateField::ZS);
        assert_eq!("SNOW_DENSITY".parse::<StateField>().unwrap(), StateField::Rho);
        assert_eq!("swi".parse::<StateField>().unwrap(), StateField::RoPredSum);
        assert!("depth".parse::<StateField>().is_err());
    }

    #[test]
    fn test_parse_list_dedups() {
        let fields = StateField::parse_list(&["thickness", "z_s", "temp_surf"]).unwrap();
        assert_eq!(fields, vec![StateField::ZS, StateField::TS0]);
    }

    #[test]
    fn test_static_fields() {
        assert!(StateField::Mask.is_static());
        assert!(!StateField::ZS.is_static());
    }
}
