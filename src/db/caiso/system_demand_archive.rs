use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{error, info, warn};
use serde::Serialize;

use crate::api::caiso::_api_caiso_core::MarketRun;
use crate::config::CaisoOasisConfig;
use crate::error::{DownloadError, InputError};
use crate::interval::date_range::{format_oasis, parse_timestamp, DateRange};
use crate::utils::lib_download::{download_with_retry, new_client, Transport};
use crate::utils::lib_retry::{Pause, ThreadPause};
use crate::utils::lib_table::Table;
use crate::utils::lib_xml::records_from_bytes;
use crate::utils::lib_zip::{extract_xml_documents, is_xml, list_archive, ArchiveError};

/// What to download.  Anything left as `None` comes from the config.
#[derive(Clone, Debug, Default)]
pub struct DownloadRequest {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub output_dir: Option<String>,
    pub data_dir: Option<String>,
    pub market_run: Option<String>,
    pub extract_and_parse: Option<bool>,
}

/// Outcome of a download session with at least one chunk downloaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionResult {
    pub market_run: MarketRun,
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub zip_files: Vec<PathBuf>,
    pub csv_files: Vec<PathBuf>,
}

/// Validated inputs of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Plan {
    market_run: MarketRun,
    chunks: Vec<DateRange>,
    output_dir: PathBuf,
    data_dir: PathBuf,
    extract_and_parse: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CaisoSystemDemandArchive {
    pub config: CaisoOasisConfig,
}

/// Drop the `:` and the `-0000` suffix, e.g. `20230919T0700`.
fn filename_date(ts: jiff::Timestamp) -> String {
    format_oasis(ts).replace(':', "").replace("-0000", "")
}

impl CaisoSystemDemandArchive {
    pub fn new(config: CaisoOasisConfig) -> Self {
        CaisoSystemDemandArchive { config }
    }

    /// Name of the zip file for one chunk, for example
    /// `chunk_01_of_04_system_demand_2DA_20230901T0000_20231001T0000.zip`
    pub fn zip_filename(
        &self,
        market_run: MarketRun,
        range: &DateRange,
        chunk_index: usize,
        total_chunks: usize,
    ) -> String {
        let name = self
            .config
            .output_filename_format
            .replace("{market_run}", &market_run.to_string())
            .replace("{start_date}", &filename_date(range.start()))
            .replace("{end_date}", &filename_date(range.end()));
        format!("chunk_{:02}_of_{:02}_{}", chunk_index, total_chunks, name)
    }

    /// Name of the csv file made from a zip file: the chunk prefix and the
    /// `.zip` extension are removed and the extension of
    /// `csv_filename_format` is added.
    pub fn csv_filename(&self, zip_path: &Path) -> String {
        let mut name = zip_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("chunk_") {
            let parts: Vec<&str> = name.splitn(5, '_').collect();
            if parts.len() == 5 {
                name = parts[4].to_string();
            }
        }
        let mut name = name.replace(".zip", "").replace("-0000", "");
        let extension = Path::new(&self.config.csv_filename_format)
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "csv".to_string());
        if !name.ends_with(&format!(".{}", extension)) {
            name.push('.');
            name.push_str(&extension);
        }
        name
    }

    fn plan(&self, request: &DownloadRequest) -> Result<Plan, InputError> {
        let market_run: MarketRun = match &request.market_run {
            Some(m) => m.parse()?,
            None => self.config.market_run,
        };
        let start = parse_timestamp(
            request
                .start_date
                .as_deref()
                .unwrap_or(&self.config.default_start_date),
        )?;
        let end = parse_timestamp(
            request
                .end_date
                .as_deref()
                .unwrap_or(&self.config.default_end_date),
        )?;
        let chunks = DateRange::new(start, end)?.chunks(self.config.max_days_per_chunk)?;
        Ok(Plan {
            market_run,
            chunks,
            output_dir: PathBuf::from(
                request
                    .output_dir
                    .as_deref()
                    .unwrap_or(&self.config.output_directory),
            ),
            data_dir: PathBuf::from(
                request
                    .data_dir
                    .as_deref()
                    .unwrap_or(&self.config.data_directory),
            ),
            extract_and_parse: request
                .extract_and_parse
                .unwrap_or(self.config.extract_and_parse),
        })
    }

    /// Download one chunk and check that it is a readable zip file.
    /// Returns the path of the zip file, or `None` if the chunk failed.
    pub fn download_chunk(
        &self,
        transport: &dyn Transport,
        pause: &dyn Pause,
        market_run: MarketRun,
        range: &DateRange,
        chunk_index: usize,
        total_chunks: usize,
        output_dir: &Path,
    ) -> Option<PathBuf> {
        let chunk_info = format!(" (chunk {}/{})", chunk_index, total_chunks);
        info!("Downloading {} chunk{}: {}", market_run, chunk_info, range);

        let url = self.config.query.url(market_run, range);
        let path = output_dir.join(self.zip_filename(market_run, range, chunk_index, total_chunks));
        let policy = self.config.retry_policy();
        if !download_with_retry(transport, pause, &policy, &url, &path, &chunk_info) {
            return None;
        }

        match list_archive(&path) {
            Ok(names) => {
                info!(
                    "{} chunk{} ZIP contains {} files",
                    market_run,
                    chunk_info,
                    names.len()
                );
                let xml: Vec<&String> = names
                    .iter()
                    .filter(|n| is_xml(n))
                    .collect();
                if !xml.is_empty() {
                    info!("{} chunk{} XML files: {:?}", market_run, chunk_info, xml);
                }
                Some(path)
            }
            Err(e) => {
                warn!(
                    "{} chunk{} downloaded file is not a valid ZIP file: {}",
                    market_run, chunk_info, e
                );
                None
            }
        }
    }

    /// Read all the xml documents of a zip file into one table.  A document
    /// that can't be parsed contributes no rows.
    pub fn read_zip(&self, zip_path: &Path) -> Result<Table, ArchiveError> {
        let mut table = Table::default();
        for doc in extract_xml_documents(zip_path)? {
            let records = records_from_bytes(&doc.name, &doc.bytes);
            if records.is_empty() {
                warn!("No data extracted from {}", doc.name);
            } else {
                info!("Successfully parsed {}", doc.name);
                table.append(records);
            }
        }
        Ok(table)
    }

    /// Convert a zip file into a csv file in `data_dir`.  Returns the path of
    /// the csv file, or `None` if nothing could be parsed.
    pub fn extract_and_parse(&self, zip_path: &Path, data_dir: &Path) -> Option<PathBuf> {
        let table = match self.read_zip(zip_path) {
            Ok(table) => table,
            Err(ArchiveError::NoParsableContent(name)) => {
                warn!("No XML files found in the ZIP archive {}", name);
                return None;
            }
            Err(e) => {
                error!("Error extracting/parsing ZIP file: {}", e);
                return None;
            }
        };
        if table.is_empty() {
            error!(
                "No data could be parsed from the ZIP file {}",
                zip_path.display()
            );
            return None;
        }
        info!(
            "Combined data shape: ({}, {})",
            table.len(),
            table.columns().len()
        );

        let csv_path = data_dir.join(self.csv_filename(zip_path));
        if csv_path.exists() {
            info!("Overwriting existing CSV file: {}", csv_path.display());
        }
        if let Err(e) = table.write_csv(&csv_path) {
            error!("Failed to write {}: {}", csv_path.display(), e);
            return None;
        }
        info!("Data saved to CSV: {}", csv_path.display());
        info!(
            "CSV file contains {} rows and {} columns",
            table.len(),
            table.columns().len()
        );
        info!("Columns: {}", table.columns().iter().join(", "));
        info!("Sample data (first 3 rows):\n{}", table.preview(3));
        Some(csv_path)
    }

    /// Download all the chunks of the requested period, one after the other,
    /// then optionally convert each zip file to csv.
    ///
    /// Chunk failures are tolerated.  Fails only if the input is invalid or
    /// if no chunk could be downloaded.
    pub fn download_data(
        &self,
        transport: &dyn Transport,
        pause: &dyn Pause,
        request: &DownloadRequest,
    ) -> Result<SessionResult, DownloadError> {
        let plan = self.plan(request)?;
        for dir in [&plan.output_dir, &plan.data_dir] {
            fs::create_dir_all(dir).map_err(|source| DownloadError::Directory {
                path: dir.display().to_string(),
                source,
            })?;
        }

        let total = plan.chunks.len();
        let policy = self.config.retry_policy();
        let mut zip_files: Vec<PathBuf> = Vec::new();
        for (i, range) in plan.chunks.iter().enumerate() {
            if i > 0 {
                let delay = policy.pacing_delay();
                info!(
                    "Waiting {:.1} seconds before next chunk...",
                    delay.as_secs_f64()
                );
                pause.pause(delay);
            }
            match self.download_chunk(
                transport,
                pause,
                plan.market_run,
                range,
                i + 1,
                total,
                &plan.output_dir,
            ) {
                Some(path) => zip_files.push(path),
                None => error!("Failed to download chunk {}/{}", i + 1, total),
            }
        }

        if zip_files.is_empty() {
            error!("No chunks were downloaded successfully");
            return Err(DownloadError::NothingDownloaded(total));
        }
        info!(
            "Successfully downloaded {}/{} chunks",
            zip_files.len(),
            total
        );

        let mut csv_files: Vec<PathBuf> = Vec::new();
        if plan.extract_and_parse {
            for zip_file in &zip_files {
                if let Some(csv_file) = self.extract_and_parse(zip_file, &plan.data_dir) {
                    csv_files.push(csv_file);
                }
            }
        }

        Ok(SessionResult {
            market_run: plan.market_run,
            total_chunks: total,
            successful_chunks: zip_files.len(),
            zip_files,
            csv_files,
        })
    }

    /// Same as [`Self::download_data`] with a real http client and real sleeps.
    pub fn download(&self, request: &DownloadRequest) -> Result<SessionResult, Box<dyn std::error::Error>> {
        let client = new_client()?;
        Ok(self.download_data(&client, &ThreadPause, request)?)
    }

    /// Log what the api offers.  No network access.
    pub fn print_info(&self) {
        info!("CAISO OASIS API typically provides data for:");
        info!("- Historical data: Available for past dates");
        info!("- Current data: Available for recent dates");
        info!("- Forecast data: Available for future dates");
        info!(
            "- Market runs: {}",
            MarketRun::ALL
                .iter()
                .map(|m| format!("{} ({})", m, m.description()))
                .join(", ")
        );
        info!(
            "- Maximum recommended download period: {} days",
            self.config.max_days_per_chunk
        );
        info!(
            "- Rate limiting: {}s delay between requests",
            self.config.rate_limit_delay
        );
        info!("- Retry attempts: {} per chunk", self.config.max_retries);
        info!("- Data format: XML files in ZIP archives");
        info!("Note: Data availability may vary. Check CAISO OASIS website for current availability.");
    }
}
