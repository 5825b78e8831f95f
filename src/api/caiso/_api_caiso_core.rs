use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::InputError;

/// Namespace of the OASIS xml reports.
pub const OASIS_REPORT_NS: &str = "http://www.caiso.com/soa/OASISReport_v1.xsd";

/// The demand forecast horizons published on OASIS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MarketRun {
    /// Day ahead
    #[serde(rename = "DA")]
    Da,
    /// Two day ahead
    #[serde(rename = "2DA")]
    TwoDa,
    /// Seven day ahead
    #[serde(rename = "7DA")]
    SevenDa,
}

impl MarketRun {
    pub const ALL: [MarketRun; 3] = [MarketRun::Da, MarketRun::TwoDa, MarketRun::SevenDa];

    /// Value of the `market_run_id` query parameter.  The day ahead
    /// forecast is published under the day ahead market, `DAM`.
    pub fn api_id(&self) -> &'static str {
        match self {
            MarketRun::Da => "DAM",
            MarketRun::TwoDa => "2DA",
            MarketRun::SevenDa => "7DA",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MarketRun::Da => "Day Ahead",
            MarketRun::TwoDa => "2-Day Ahead",
            MarketRun::SevenDa => "7-Day Ahead",
        }
    }
}

impl fmt::Display for MarketRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRun::Da => write!(f, "DA"),
            MarketRun::TwoDa => write!(f, "2DA"),
            MarketRun::SevenDa => write!(f, "7DA"),
        }
    }
}

impl FromStr for MarketRun {
    type Err = InputError;

    /// Case insensitive, e.g. `da`, `2DA`, `7da`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DA" => Ok(MarketRun::Da),
            "2DA" => Ok(MarketRun::TwoDa),
            "7DA" => Ok(MarketRun::SevenDa),
            _ => Err(InputError::MarketRun(s.to_string())),
        }
    }
}
