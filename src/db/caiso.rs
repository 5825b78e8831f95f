pub mod system_demand_archive;
