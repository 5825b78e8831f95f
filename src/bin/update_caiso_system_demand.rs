use std::{error::Error, path::Path, process::ExitCode};

use clap::Parser;
use log::error;
use oasis_demand::{
    config::CaisoOasisConfig,
    db::caiso::system_demand_archive::{CaisoSystemDemandArchive, DownloadRequest},
    utils::{
        lib_download::{new_client, Transport},
        lib_retry::{Pause, ThreadPause},
    },
};

/// Download system demand forecasts from the CAISO OASIS API.
///
/// Examples:
///   update_caiso_system_demand --start-date 2023-09-19 --end-date 2023-10-20 --market-run DA
///   update_caiso_system_demand --start-date "2023-09-19 07:00" --end-date "2023-09-20 07:00"
///   update_caiso_system_demand --no-parse
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Start date (YYYY-MM-DD or YYYY-MM-DD HH:MM)
    #[arg(long)]
    start_date: Option<String>,

    /// End date (YYYY-MM-DD or YYYY-MM-DD HH:MM)
    #[arg(long)]
    end_date: Option<String>,

    /// Output directory for downloaded ZIP files
    #[arg(long)]
    output_dir: Option<String>,

    /// Output directory for CSV files
    #[arg(long)]
    data_dir: Option<String>,

    /// Market run: DA (Day Ahead), 2DA (2-Day Ahead), 7DA (7-Day Ahead)
    #[arg(long, value_parser = ["DA", "2DA", "7DA"], ignore_case = true)]
    market_run: Option<String>,

    /// Configuration file path
    #[arg(long, default_value = "config.env")]
    config: String,

    /// Show information about available data
    #[arg(long)]
    info: bool,

    /// Download ZIP files only, do not extract and parse to CSV
    #[arg(long)]
    no_parse: bool,
}

fn run(args: Args, transport: &dyn Transport, pause: &dyn Pause) -> Result<(), Box<dyn Error>> {
    let config = CaisoOasisConfig::load(Path::new(&args.config))?;
    let archive = CaisoSystemDemandArchive::new(config);
    if args.info {
        archive.print_info();
        return Ok(());
    }

    let request = DownloadRequest {
        start_date: args.start_date,
        end_date: args.end_date,
        output_dir: args.output_dir,
        data_dir: args.data_dir,
        market_run: args.market_run,
        extract_and_parse: if args.no_parse { Some(false) } else { None },
    };
    let result = archive.download_data(transport, pause, &request)?;

    println!("\nDownload successful!");
    println!(
        "Downloaded {}/{} chunks for {}",
        result.successful_chunks, result.total_chunks, result.market_run
    );
    if let Some(dir) = result.zip_files.first().and_then(|p| p.parent()) {
        println!("ZIP files saved to: {}", dir.display());
    }
    if let Some(dir) = result.csv_files.first().and_then(|p| p.parent()) {
        println!("CSV files saved to: {}", dir.display());
        println!("CSV files created: {} files", result.csv_files.len());
    }
    Ok(())
}

/// 0 if at least one chunk was downloaded (or info was shown), 1 otherwise.
fn exit_status(outcome: Result<(), Box<dyn Error>>) -> u8 {
    match outcome {
        Ok(()) => 0,
        Err(e) => {
            error!("An error occurred: {}", e);
            println!("\nDownload failed. Check the logs above for details.");
            1
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let outcome = match new_client() {
        Ok(client) => run(args, &client, &ThreadPause),
        Err(e) => Err(e.into()),
    };
    ExitCode::from(exit_status(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oasis_demand::utils::lib_download::FetchError;
    use reqwest::StatusCode;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::{Cursor, Read, Write};
    use std::time::Duration;
    use zip::write::SimpleFileOptions;

    const REPORT: &str = r#"<OASISReport xmlns="http://www.caiso.com/soa/OASISReport_v1.xsd">
  <REPORT_DATA><RESOURCE_NAME>CA ISO-TAC</RESOURCE_NAME><VALUE>24512</VALUE></REPORT_DATA>
</OASISReport>"#;

    struct Server {
        replies: RefCell<VecDeque<(StatusCode, Vec<u8>)>>,
        requests: RefCell<usize>,
    }

    impl Server {
        fn new(replies: Vec<(StatusCode, Vec<u8>)>) -> Self {
            Server {
                replies: RefCell::new(replies.into()),
                requests: RefCell::new(0),
            }
        }
    }

    impl Transport for Server {
        fn fetch(&self, _url: &str) -> Result<(StatusCode, Box<dyn Read + '_>), FetchError> {
            *self.requests.borrow_mut() += 1;
            let (status, body) = self
                .replies
                .borrow_mut()
                .pop_front()
                .unwrap_or((StatusCode::NOT_FOUND, Vec::new()));
            Ok((status, Box::new(Cursor::new(body))))
        }
    }

    struct NoPause;

    impl Pause for NoPause {
        fn pause(&self, _duration: Duration) {}
    }

    fn report_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("SLD_FCST_2DA.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(REPORT.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn args(dir: &Path, extra: &[&str]) -> Args {
        let config = dir.join("missing.env");
        let output = dir.join("zip");
        let data = dir.join("csv");
        let mut argv = vec![
            "update_caiso_system_demand".to_string(),
            "--config".to_string(),
            config.display().to_string(),
            "--output-dir".to_string(),
            output.display().to_string(),
            "--data-dir".to_string(),
            data.display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::parse_from(argv)
    }

    #[test]
    fn invalid_input_fails_without_requests() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let server = Server::new(vec![]);
        let args = args(dir.path(), &["--start-date", "not-a-date"]);
        assert_eq!(exit_status(run(args, &server, &NoPause)), 1);
        assert_eq!(*server.requests.borrow(), 0);
        Ok(())
    }

    #[test]
    fn nothing_downloaded_fails() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let server = Server::new(vec![]);
        let args = args(
            dir.path(),
            &["--start-date", "2023-09-01", "--end-date", "2023-10-16"],
        );
        assert_eq!(exit_status(run(args, &server, &NoPause)), 1);
        assert_eq!(*server.requests.borrow(), 2);
        Ok(())
    }

    #[test]
    fn partial_download_succeeds() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let server = Server::new(vec![
            (StatusCode::NOT_FOUND, Vec::new()),
            (StatusCode::OK, report_zip()),
        ]);
        let args = args(
            dir.path(),
            &[
                "--start-date",
                "2023-09-01",
                "--end-date",
                "2023-10-16",
                "--market-run",
                "da",
            ],
        );
        assert_eq!(exit_status(run(args, &server, &NoPause)), 0);
        assert_eq!(*server.requests.borrow(), 2);
        assert_eq!(std::fs::read_dir(dir.path().join("zip"))?.count(), 1);
        assert_eq!(std::fs::read_dir(dir.path().join("csv"))?.count(), 1);
        Ok(())
    }

    #[test]
    fn info_makes_no_requests() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let server = Server::new(vec![]);
        assert_eq!(exit_status(run(args(dir.path(), &["--info"]), &server, &NoPause)), 0);
        assert_eq!(*server.requests.borrow(), 0);
        Ok(())
    }
}
