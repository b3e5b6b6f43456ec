//! GPU device and architecture identification.

use strum::{Display, EnumString};

/// GCN microarchitecture generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum GpuArchitecture {
    /// Southern Islands (GCN 1.0).
    #[strum(serialize = "gcn1.0", serialize = "si")]
    Gcn1_0,
    /// Sea Islands (GCN 1.1).
    #[strum(serialize = "gcn1.1", serialize = "ci")]
    Gcn1_1,
    /// Volcanic Islands (GCN 1.2).
    #[strum(serialize = "gcn1.2", serialize = "vi")]
    Gcn1_2,
    /// Vega (GCN 1.4).
    #[strum(serialize = "gcn1.4", serialize = "vega")]
    Gcn1_4,
}

/// Concrete GPU device selected on the command line or by `.gpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum GpuDevice {
    /// GCN 1.0 devices.
    CapeVerde,
    /// GCN 1.0 devices.
    Pitcairn,
    /// GCN 1.0 devices.
    Tahiti,
    /// GCN 1.1 devices.
    Bonaire,
    /// GCN 1.1 devices.
    Hawaii,
    /// GCN 1.2 devices.
    Tonga,
    /// GCN 1.2 devices.
    Fiji,
    /// GCN 1.2 devices.
    Polaris10,
    /// GCN 1.2 devices.
    Polaris11,
    /// GCN 1.4 devices.
    Vega10,
    /// GCN 1.4 devices.
    Vega11,
}

impl GpuDevice {
    /// The microarchitecture this device implements.
    pub fn architecture(self) -> GpuArchitecture {
        use GpuDevice::*;
        match self {
            CapeVerde | Pitcairn | Tahiti => GpuArchitecture::Gcn1_0,
            Bonaire | Hawaii => GpuArchitecture::Gcn1_1,
            Tonga | Fiji | Polaris10 | Polaris11 => GpuArchitecture::Gcn1_2,
            Vega10 | Vega11 => GpuArchitecture::Gcn1_4,
        }
    }
}

impl GpuArchitecture {
    /// Number of addressable scalar registers.
    pub fn max_sgprs(self) -> u16 {
        match self {
            GpuArchitecture::Gcn1_0 | GpuArchitecture::Gcn1_1 => 104,
            GpuArchitecture::Gcn1_2 | GpuArchitecture::Gcn1_4 => 102,
        }
    }

    /// Number of addressable vector registers.
    pub fn max_vgprs(self) -> u16 {
        256
    }
}

impl Default for GpuDevice {
    fn default() -> Self {
        GpuDevice::CapeVerde
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn device_names_parse_case_insensitively() {
        assert_eq!(GpuDevice::from_str("pitcairn").unwrap(), GpuDevice::Pitcairn);
        assert_eq!(GpuDevice::from_str("Vega10").unwrap(), GpuDevice::Vega10);
        assert!(GpuDevice::from_str("gtx1080").is_err());
    }

    #[test]
    fn architecture_mapping() {
        assert_eq!(GpuDevice::Tahiti.architecture(), GpuArchitecture::Gcn1_0);
        assert_eq!(GpuDevice::Fiji.architecture(), GpuArchitecture::Gcn1_2);
        assert_eq!(GpuArchitecture::Gcn1_0.max_sgprs(), 104);
    }
}
