use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::file_format::FileFormat;

pub type Result<T> = anyhow::Result<T>;

/// Serializes `value`, normalizing line endings and guaranteeing a trailing newline.
pub fn serialize<T: Serialize>(value: &T, format: FileFormat) -> Result<String> {
    let text = match format {
        FileFormat::Yaml => serde_yml::to_string(value)?,
        FileFormat::Json => serde_json::to_string_pretty(value)?,
    };

    let mut text = text.replace("\r\n", "\n");
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

pub fn deserialize<T: DeserializeOwned>(serialized: &[u8], format: FileFormat) -> Result<T> {
    let text = std::str::from_utf8(serialized)?;
    match format {
        FileFormat::Yaml => Ok(serde_yml::from_str(text)?),
        FileFormat::Json => Ok(serde_json::from_str(text)?),
    }
}
