use std::{
    fs::{self, File},
    io,
    path::Path,
};

use log::{info, warn};
use thiserror::Error;
use zip::{result::ZipError, ZipArchive};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Invalid ZIP file {path}: {source}")]
    Corrupt { path: String, source: ZipError },

    #[error("No XML files found in the ZIP archive {0}")]
    NoParsableContent(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A document pulled out of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

fn open(zip_path: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    let file = File::open(zip_path)?;
    ZipArchive::new(file).map_err(|source| ArchiveError::Corrupt {
        path: zip_path.display().to_string(),
        source,
    })
}

pub fn is_xml(name: &str) -> bool {
    name.to_lowercase().ends_with(".xml")
}

/// Check that the file is a readable zip archive and return the names of
/// its members.
pub fn list_archive(zip_path: &Path) -> Result<Vec<String>, ArchiveError> {
    let zip = open(zip_path)?;
    Ok(zip.file_names().map(|s| s.to_string()).collect())
}

/// Unzip into a scratch directory and read back every `.xml` member.
/// The scratch directory is gone when this function returns, whatever
/// the outcome.
pub fn extract_xml_documents(zip_path: &Path) -> Result<Vec<XmlDocument>, ArchiveError> {
    info!("Extracting ZIP file: {}", zip_path.display());
    let mut zip = open(zip_path)?;
    let scratch = tempfile::tempdir()?;
    zip.extract(scratch.path())
        .map_err(|source| ArchiveError::Corrupt {
            path: zip_path.display().to_string(),
            source,
        })?;
    let names: Vec<String> = zip.file_names().map(|s| s.to_string()).collect();
    info!("Extracted {} files", names.len());

    let xml_names: Vec<&String> = names.iter().filter(|n| is_xml(n)).collect();
    if xml_names.is_empty() {
        warn!("Extracted files: {:?}", names);
        return Err(ArchiveError::NoParsableContent(
            zip_path.display().to_string(),
        ));
    }

    let mut out = Vec::with_capacity(xml_names.len());
    for name in xml_names {
        let bytes = fs::read(scratch.path().join(name))?;
        out.push(XmlDocument {
            name: name.clone(),
            bytes,
        });
    }
    Ok(out)
}
