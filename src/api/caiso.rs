pub mod _api_caiso_core;
pub mod system_demand;
