//! Output format handlers.
//!
//! Only the operations the assembler core consumes are modeled: section
//! bookkeeping, kernel switching, label notification, symbol/relocation
//! resolution hooks and binary serialization. The raw-code handler is
//! complete; the container formats share a generic handler that tracks
//! sections and kernels but does not reproduce container layout.

use crate::asm::Assembler;
use crate::config::BinaryFormat;
use crate::section::{Section, SectionFlags};
use crate::symbol::SymbolId;
use gcn_types::{KernelId, SectionId, Word, GLOBAL_KERNEL, NO_SECTION};

/// Format-specific behavior behind the core's section operations.
#[derive(Debug)]
pub enum FormatHandler {
    /// Raw machine code: exactly one `.text` section, no kernels.
    Raw,
    /// Generic container bookkeeping for AMD/AMDCL2/Gallium/ROCm.
    Generic {
        /// Selected container format.
        format: BinaryFormat,
    },
}

impl FormatHandler {
    /// Handler for `format`.
    pub fn new(format: BinaryFormat) -> Self {
        match format {
            BinaryFormat::RawCode => FormatHandler::Raw,
            other => FormatHandler::Generic { format: other },
        }
    }

    /// Whether expressions over section differences may be deferred to
    /// a final layout pass. None of the built-in handlers lays sections
    /// out late, so none of them supports it.
    pub fn with_section_diffs(&self) -> bool {
        false
    }

    /// Create the initial sections.
    pub fn initialize(asm: &mut Assembler) {
        let flags = SectionFlags::ADDRESSABLE | SectionFlags::WRITEABLE | SectionFlags::ABS_ADDRESSABLE;
        asm.sections.push(Section::new(".text", GLOBAL_KERNEL, flags));
        asm.current_kernel = GLOBAL_KERNEL;
        asm.current_section = 0;
        asm.current_out_pos = 0;
    }

    /// Id of a named section, or [`NO_SECTION`].
    pub fn section_id(asm: &Assembler, name: &str) -> SectionId {
        asm.sections
            .iter()
            .position(|s| s.name == name)
            .map(|i| i as SectionId)
            .unwrap_or(NO_SECTION)
    }

    /// `.kernel`: switch to (creating on demand) a kernel.
    pub fn switch_to_kernel(asm: &mut Assembler, line_pos: usize, name: &str) -> bool {
        match &asm.format_handler {
            FormatHandler::Raw => {
                asm.print_error(line_pos, "In rawcode defining kernels is not allowed");
                false
            }
            FormatHandler::Generic { .. } => {
                let existing = asm.kernels.iter().position(|k| k.name == name);
                let id = match existing {
                    Some(i) => i as KernelId,
                    None => {
                        let pos = asm.get_source_pos(line_pos);
                        asm.kernels.push(crate::section::Kernel::new(name, pos));
                        (asm.kernels.len() - 1) as KernelId
                    }
                };
                // close previous kernel's region, open this one's
                let text_size = asm
                    .sections
                    .iter()
                    .find(|s| s.name == ".text")
                    .map(|s| s.content.len())
                    .unwrap_or(0);
                if asm.current_kernel != GLOBAL_KERNEL {
                    asm.kernels[asm.current_kernel as usize].close_code_region(text_size);
                }
                asm.kernels[id as usize].open_code_region(text_size);
                asm.current_kernel = id;
                // kernels write into the shared .text section
                asm.current_section = Self::section_id(asm, ".text");
                asm.current_out_pos = text_size;
                true
            }
        }
    }

    /// `.main`: return to global scope code.
    pub fn switch_to_main(asm: &mut Assembler) {
        let text_size = asm
            .sections
            .iter()
            .find(|s| s.name == ".text")
            .map(|s| s.content.len())
            .unwrap_or(0);
        if asm.current_kernel != GLOBAL_KERNEL {
            asm.kernels[asm.current_kernel as usize].close_code_region(text_size);
        }
        asm.current_kernel = GLOBAL_KERNEL;
    }

    /// `.section`/`.text`/`.data`/`.rodata`: switch sections, creating
    /// them where the format allows.
    pub fn switch_section(asm: &mut Assembler, line_pos: usize, name: &str) -> bool {
        match &asm.format_handler {
            FormatHandler::Raw => {
                if name == ".text" {
                    asm.current_section = 0;
                    asm.current_out_pos = asm.sections[0].size();
                    true
                } else {
                    asm.print_error(line_pos, "Only section '.text' can be in raw code");
                    false
                }
            }
            FormatHandler::Generic { .. } => {
                let id = Self::section_id(asm, name);
                let id = if id == NO_SECTION {
                    let flags = SectionFlags::ADDRESSABLE
                        | SectionFlags::WRITEABLE
                        | SectionFlags::ABS_ADDRESSABLE;
                    asm.sections.push(Section::new(name, asm.current_kernel, flags));
                    (asm.sections.len() - 1) as SectionId
                } else {
                    id
                };
                asm.current_section = id;
                asm.current_out_pos = asm.sections[id as usize].size();
                true
            }
        }
    }

    /// Label notification (containers track kernel entry labels).
    pub fn handle_label(_asm: &mut Assembler, _label: &str) {}

    /// Final-pass symbol resolution hook. The built-in handlers carry
    /// no late-laid-out sections, so nothing extra resolves here.
    pub fn resolve_symbol(_asm: &mut Assembler, _sym: SymbolId) -> Option<(Word, SectionId)> {
        None
    }

    /// Lay out sections for section-difference resolution. No built-in
    /// handler supports it; kept as the extension point.
    pub fn prepare_section_diffs_resolving(asm: &mut Assembler) {
        let mut address = 0u64;
        let space = 0usize;
        let mut sections = Vec::new();
        for (i, section) in asm.sections.iter_mut().enumerate() {
            section.rel_space = Some(space);
            section.rel_address = address;
            address += section.content.len() as u64;
            sections.push(i as SectionId);
        }
        asm.rel_spaces_sections = vec![sections];
    }

    /// Post-parse fixups before serialization.
    pub fn prepare_binary(_asm: &mut Assembler) {}

    /// Serialize the output.
    pub fn make_binary(asm: &Assembler) -> Vec<u8> {
        match &asm.format_handler {
            FormatHandler::Raw => asm.sections.first().map(|s| s.content.clone()).unwrap_or_default(),
            FormatHandler::Generic { .. } => {
                // concatenated sections with a minimal descriptor table;
                // container layout is out of scope
                let mut out = Vec::new();
                for section in &asm.sections {
                    out.extend_from_slice(&section.content);
                }
                out
            }
        }
    }
}

