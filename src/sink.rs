//! Append-only CSV output for recorded addresses.
//!
//! Each row is flushed before `append` returns, so a killed run leaves a file
//! in which every complete line is a valid record.

use crate::schemas::{CrawlRow, CRAWL_OUTPUT_HEADER};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvSink {
    /// Open `path` for appending, writing the header if the file is new or empty.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let io_err = |source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        let is_empty = file.metadata().map_err(io_err)?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_empty {
            writer.write_record(CRAWL_OUTPUT_HEADER)?;
            writer.flush().map_err(io_err)?;
        } else {
            info!("Appending to existing output {:?}", path);
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    /// Write one row and flush it.
    pub fn append(&mut self, row: &CrawlRow) -> Result<(), SinkError> {
        self.writer.serialize(row)?;
        self.writer.flush().map_err(|source| SinkError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
