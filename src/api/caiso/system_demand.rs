use crate::interval::date_range::{format_oasis, DateRange};

use super::_api_caiso_core::MarketRun;

/// The static part of an OASIS `SingleZip` query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OasisQuery {
    pub base_url: String,
    pub query_name: String,
    pub version: String,
}

impl Default for OasisQuery {
    fn default() -> Self {
        OasisQuery {
            base_url: "http://oasis.caiso.com/oasisapi/SingleZip".to_string(),
            query_name: "SLD_FCST".to_string(),
            version: "1".to_string(),
        }
    }
}

impl OasisQuery {
    /// For example
    /// http://oasis.caiso.com/oasisapi/SingleZip?queryname=SLD_FCST&market_run_id=DAM&startdatetime=20230919T00:00-0000&enddatetime=20230920T00:00-0000&version=1
    pub fn url(&self, market_run: MarketRun, range: &DateRange) -> String {
        format!(
            "{}?queryname={}&market_run_id={}&startdatetime={}&enddatetime={}&version={}",
            self.base_url,
            self.query_name,
            market_run.api_id(),
            format_oasis(range.start()),
            format_oasis(range.end()),
            self.version
        )
    }
}
