use crate::lookup::Table;

pub const GRID_CARBON_INTENSITY_DEFAULT: f64 = 500.0;
pub const TRANSMISSION_DISTANCE_DEFAULT_KM: f64 = -1.0;

/// Keyed access to the per-region grid carbon intensities (overall average
/// and per-hour) and the great-circle distances between regions.
#[derive(Debug, Clone)]
pub struct CarbonLoader {
    data: Table,
}

impl CarbonLoader {
    pub fn new(data: Table) -> Self {
        CarbonLoader { data }
    }

    /// Grid carbon intensity in gCO2e/kWh. With an hour selector set, reads
    /// the hourly average instead of the overall one; an hour missing from
    /// the table degrades to the default.
    pub fn grid_carbon_intensity(&self, region_name: &str, hourly_setting: Option<&str>) -> f64 {
        let hour = hourly_setting.unwrap_or("overall");
        self.data.get_f64(GRID_CARBON_INTENSITY_DEFAULT, &[region_name, "averages", hour, "carbon_intensity"])
    }

    /// Distance in km between two regions, or -1.0 when unknown.
    pub fn transmission_distance(&self, from_region_name: &str, to_region_name: &str) -> f64 {
        self.data.get_f64(TRANSMISSION_DISTANCE_DEFAULT_KM, &[from_region_name, "transmission_distances", to_region_name])
    }
}
