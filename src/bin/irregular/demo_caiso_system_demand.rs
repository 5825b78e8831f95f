use std::error::Error;

use log::{error, info};
use oasis_demand::db::caiso::system_demand_archive::{CaisoSystemDemandArchive, DownloadRequest};

fn request(start: &str, end: &str, market_run: &str, dir: &str, parse: bool) -> DownloadRequest {
    DownloadRequest {
        start_date: Some(start.to_string()),
        end_date: Some(end.to_string()),
        output_dir: Some(format!("./{}_downloads", dir)),
        data_dir: Some(format!("./{}_data", dir)),
        market_run: Some(market_run.to_string()),
        extract_and_parse: Some(parse),
    }
}

/// Walk through the usual ways of calling the downloader.  Talks to the
/// real OASIS api, so it takes a few minutes.
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let archive = CaisoSystemDemandArchive::default();
    let cases = [
        ("config defaults (2DA, with CSV extraction)", DownloadRequest::default()),
        ("DA, maps to DAM upstream", request("2023-09-19", "2023-09-20", "DA", "da", true)),
        ("2DA over 31 days, 2 chunks", request("2023-09-19", "2023-10-20", "2DA", "2da", true)),
        ("7DA with a start time", request("2023-09-19 07:00", "2023-09-20 07:00", "7DA", "7da", true)),
        ("2DA over 91 days, ZIP only", request("2023-09-01", "2023-12-01", "2DA", "zip_only", false)),
    ];
    for (i, (title, req)) in cases.iter().enumerate() {
        info!("{}. Downloading {}...", i + 1, title);
        match archive.download(req) {
            Ok(result) => info!("Success! {}", serde_json::to_string(&result)?),
            Err(e) => error!("Failed: {}", e),
        }
    }

    info!("{}. Information about available data:", cases.len() + 1);
    archive.print_info();
    Ok(())
}
