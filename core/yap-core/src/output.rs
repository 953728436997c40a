//! Reading back the transcript the worker appends to.

use fs_err as fs;
use std::io::ErrorKind;

use crate::config::Config;
use crate::error::{Result, YapError};
use crate::storage::StorageConfig;

/// Contents of the output file of the current (or last) session.
pub fn read_output(config: &Config, storage: &StorageConfig) -> Result<String> {
    if !config.output_file {
        return Err(YapError::OutputDisabled);
    }

    match fs::read_to_string(storage.output_file()) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(YapError::OutputMissing),
        Err(err) => Err(YapError::io("reading output file", err)),
    }
}
