//! DS18B20 access through the kernel's 1-Wire sysfs interface.
//!
//! Each device shows up as `<dir>/28-<serial>/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```

use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

const FAMILY_PREFIX: &str = "28-";
const SLAVE_FILE: &str = "w1_slave";

#[derive(Debug, Error)]
pub enum W1Error {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("crc check failed")]
    Crc,
    #[error("malformed w1_slave output: {0:?}")]
    Malformed(String),
}

/// Returns the temperature in degrees Celsius.
pub fn parse_w1_slave(raw: &str) -> Result<f64, W1Error> {
    let mut lines = raw.lines();
    let crc_line = lines
        .next()
        .ok_or_else(|| W1Error::Malformed(raw.to_string()))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(W1Error::Crc);
    }

    let data_line = lines
        .next()
        .ok_or_else(|| W1Error::Malformed(raw.to_string()))?;
    let (_, milli) = data_line
        .rsplit_once("t=")
        .ok_or_else(|| W1Error::Malformed(data_line.to_string()))?;
    let milli: i32 = milli
        .trim()
        .parse()
        .map_err(|_| W1Error::Malformed(data_line.to_string()))?;

    Ok(f64::from(milli) / 1000.0)
}

/// Sorted ids of the DS18B20 devices under `dir`.
pub async fn list_sensors(dir: &Path) -> Result<Vec<String>, W1Error> {
    let read_error = |source: io::Error| W1Error::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_error)?;
    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(FAMILY_PREFIX) {
                ids.push(name.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

pub async fn read_temperature(dir: &Path, id: &str) -> Result<f64, W1Error> {
    let path = dir.join(id).join(SLAVE_FILE);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| W1Error::Read { path, source })?;
    parse_w1_slave(&raw)
}

#[cfg(test)]
pub(crate) fn write_device(dir: &Path, id: &str, milli: i32, crc_ok: bool) {
    let device = dir.join(id);
    std::fs::create_dir_all(&device).unwrap();
    let verdict = if crc_ok { "YES" } else { "NO" };
    std::fs::write(
        device.join(SLAVE_FILE),
        format!(
            "72 01 4b 46 7f ff 0e 10 57 : crc=57 {verdict}\n72 01 4b 46 7f ff 0e 10 57 t={milli}\n"
        ),
    )
    .unwrap();
}
