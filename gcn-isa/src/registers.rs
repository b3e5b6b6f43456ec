//! Register files and special register names.

use gcn_types::{GpuArchitecture, RegIndex};

/// Register file a range belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegClass {
    /// Scalar general purpose registers (`s0..`).
    Sgpr = 0,
    /// Vector general purpose registers (`v0..`).
    Vgpr = 1,
}

impl RegClass {
    /// Index used by the allocator's per-type arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Highest usable register count for the class on `arch`.
    pub fn max_registers(self, arch: GpuArchitecture) -> RegIndex {
        match self {
            RegClass::Sgpr => arch.max_sgprs(),
            RegClass::Vgpr => arch.max_vgprs(),
        }
    }
}

/// Consecutive register range `[start, end)` in one register file.
///
/// Single registers are one-long ranges. The range carries no class; the
/// context that produced it (operand parser, regvar declaration) does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegRange {
    /// First register index.
    pub start: RegIndex,
    /// One past the last register index.
    pub end: RegIndex,
}

impl RegRange {
    /// A one-register range.
    pub fn single(index: RegIndex) -> Self {
        RegRange { start: index, end: index + 1 }
    }

    /// Number of registers covered.
    pub fn len(self) -> u16 {
        self.end - self.start
    }

    /// True for an empty (invalid) range.
    pub fn is_empty(self) -> bool {
        self.end <= self.start
    }
}

/// Special scalar operand names and their source-operand field values.
///
/// The field values are the 9-bit SRC encoding shared by scalar and
/// vector instructions; SGPRs occupy 0..=103 and VGPRs 256..=511.
pub const SPECIAL_REG_NAMES: &[(&str, u16)] = &[
    ("exec", 126),
    ("exec_hi", 127),
    ("exec_lo", 126),
    ("m0", 124),
    ("vcc", 106),
    ("vcc_hi", 107),
    ("vcc_lo", 106),
];

/// Architecture bit for instruction-table filtering.
pub fn arch_mask_for(arch: GpuArchitecture) -> u32 {
    match arch {
        GpuArchitecture::Gcn1_0 => crate::ARCH_GCN_1_0,
        GpuArchitecture::Gcn1_1 => crate::ARCH_GCN_1_1,
        GpuArchitecture::Gcn1_2 => crate::ARCH_GCN_1_2,
        GpuArchitecture::Gcn1_4 => crate::ARCH_GCN_1_4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_names_are_sorted_for_binary_search() {
        assert!(SPECIAL_REG_NAMES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn range_len() {
        assert_eq!(RegRange::single(4).len(), 1);
        assert_eq!(RegRange { start: 4, end: 8 }.len(), 4);
    }
}
