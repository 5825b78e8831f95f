pub mod lib_download;
pub mod lib_retry;
pub mod lib_table;
pub mod lib_xml;
pub mod lib_zip;
