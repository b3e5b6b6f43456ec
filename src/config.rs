//! Assembler configuration.

use std::path::PathBuf;

use gcn_types::GpuDevice;
use strum::{Display, EnumString};

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum BinaryFormat {
    /// Raw machine code, no container.
    #[strum(serialize = "rawcode", serialize = "raw")]
    RawCode,
    /// AMD Catalyst OpenCL 1.2 binary.
    #[strum(serialize = "amd", serialize = "catalyst")]
    Amd,
    /// AMD OpenCL 2.0 binary.
    #[strum(serialize = "amdcl2")]
    AmdCl2,
    /// Mesa Gallium compute object.
    #[strum(serialize = "gallium")]
    Gallium,
    /// ROCm HSA code object.
    #[strum(serialize = "rocm")]
    Rocm,
}

impl Default for BinaryFormat {
    fn default() -> Self {
        BinaryFormat::RawCode
    }
}

/// Command-line symbol definition.
pub type DefSym = (String, u64);

/// Everything an [`crate::Assembler`] needs to know before reading the
/// first line.
#[derive(Debug, Clone)]
pub struct AsmConfig {
    /// Output container format.
    pub format: BinaryFormat,
    /// Target device.
    pub device: GpuDevice,
    /// 64-bit address mode.
    pub bits64: bool,
    /// Emit warnings.
    pub warnings: bool,
    /// Start in alternate-macro mode.
    pub alternate_macro: bool,
    /// Reproduce the historical broken float-literal parsing.
    pub buggy_fp_lit: bool,
    /// Match macro names case-insensitively.
    pub macro_no_case: bool,
    /// Accept the old modifier-parameter syntax.
    pub old_mod_param: bool,
    /// Assemble without writing output.
    pub test_run: bool,
    /// Force the deferred-resolution path even for immediately
    /// resolvable expressions.
    pub test_resolve: bool,
    /// Include search directories, in order.
    pub include_dirs: Vec<PathBuf>,
    /// Symbols seeded into the global scope.
    pub def_syms: Vec<DefSym>,
}

impl Default for AsmConfig {
    fn default() -> Self {
        AsmConfig {
            format: BinaryFormat::default(),
            device: GpuDevice::default(),
            bits64: false,
            warnings: true,
            alternate_macro: false,
            buggy_fp_lit: false,
            macro_no_case: false,
            old_mod_param: false,
            test_run: false,
            test_resolve: false,
            include_dirs: Vec::new(),
            def_syms: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn format_names() {
        assert_eq!(BinaryFormat::from_str("rawcode").unwrap(), BinaryFormat::RawCode);
        assert_eq!(BinaryFormat::from_str("AMDCL2").unwrap(), BinaryFormat::AmdCl2);
        assert!(BinaryFormat::from_str("elf").is_err());
    }
}
