//! Content types derived from file extensions

use serde::{Deserialize, Serialize};

/// Declared content type of a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Schema-driven table, 32-bit row layout
    Dat,
    /// Schema-driven table, 64-bit row layout
    Dat64,
    /// Schema-driven table, 32-bit, UTF-32 strings
    DatL,
    /// Schema-driven table, 64-bit, UTF-32 strings
    DatL64,
    Text,
    Image,
    Audio,
    /// Compressed bundle blob or bundle index
    Bundle,
    Unknown,
}

impl DataFormat {
    /// Infer the format from the last segment of a logical path
    pub fn from_path(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
        if name.ends_with(".bundle.bin") || name.ends_with(".index.bin") {
            return DataFormat::Bundle;
        }

        let ext = match name.rfind('.') {
            Some(idx) => &name[idx + 1..],
            None => return DataFormat::Unknown,
        };

        match ext {
            "dat" => DataFormat::Dat,
            "dat64" => DataFormat::Dat64,
            "datl" => DataFormat::DatL,
            "datl64" => DataFormat::DatL64,
            "txt" | "csv" | "json" | "xml" | "ini" | "hlsl" | "fx" | "ot" | "otc" | "it" | "itc"
            | "ao" | "aoc" | "mat" | "tsi" | "arm" | "ecf" | "et" | "gt" => DataFormat::Text,
            "dds" | "png" | "jpg" | "jpeg" | "tga" | "bmp" => DataFormat::Image,
            "ogg" | "wav" | "bank" => DataFormat::Audio,
            _ => DataFormat::Unknown,
        }
    }

    /// One of the tabular dat variants
    pub fn is_dat(&self) -> bool {
        matches!(
            self,
            DataFormat::Dat | DataFormat::Dat64 | DataFormat::DatL | DataFormat::DatL64
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dat_variants() {
        assert_eq!(DataFormat::from_path("Data/Mods.dat"), DataFormat::Dat);
        assert_eq!(DataFormat::from_path("Data/Mods.DAT64"), DataFormat::Dat64);
        assert_eq!(DataFormat::from_path("Data/Mods.datl"), DataFormat::DatL);
        assert_eq!(DataFormat::from_path("Data/Mods.datl64"), DataFormat::DatL64);
        assert!(DataFormat::Dat64.is_dat());
        assert!(!DataFormat::Text.is_dat());
    }

    #[test]
    fn test_bundle_names() {
        assert_eq!(
            DataFormat::from_path("Bundles2/Data.bundle.bin"),
            DataFormat::Bundle
        );
        assert_eq!(
            DataFormat::from_path("Bundles2/_.index.bin"),
            DataFormat::Bundle
        );
    }

    #[test]
    fn test_unknown_and_extensionless() {
        assert_eq!(DataFormat::from_path("README"), DataFormat::Unknown);
        assert_eq!(DataFormat::from_path("a.b/c"), DataFormat::Unknown);
        assert_eq!(DataFormat::from_path("x.weird"), DataFormat::Unknown);
        assert_eq!(DataFormat::from_path("Art/ui.dds"), DataFormat::Image);
    }
}
