//! Relocatable object image extraction.
//!
//! The emitter hands back a complete object file. [`read_object`] walks its
//! sections and repacks the interesting ones into one contiguous
//! [`CodeBuffer`] whose interior offsets follow a fixed running-sum layout:
//! instructions first, then the safepoint table, handler table, constant
//! pool, code comments, and relocation info. Ranges this pipeline does not
//! produce are present in the layout with size zero, so consumers can
//! address every range unconditionally.

use object::{Object, ObjectSection, SectionKind};

use crate::compiler::CompileError;

/// Sizes of the six sub-ranges of a code buffer, in layout order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionSizes {
    /// Machine instruction bytes.
    pub instructions: usize,
    /// Safepoint table bytes.
    pub safepoint_table: usize,
    /// Exception handler table bytes.
    pub handler_table: usize,
    /// Constant pool bytes.
    pub constant_pool: usize,
    /// Code comment bytes.
    pub code_comments: usize,
    /// Relocation info bytes.
    pub reloc_info: usize,
}

/// Offsets of every sub-range inside a code buffer.
///
/// Each offset is the previous offset plus the previous size; an empty
/// range still has a well-defined offset equal to the next range's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLayout {
    /// Size of the instruction range, which always starts at offset 0.
    pub instruction_size: usize,
    /// Start of the safepoint table.
    pub safepoint_table_offset: usize,
    /// Size of the safepoint table.
    pub safepoint_table_size: usize,
    /// Start of the handler table.
    pub handler_table_offset: usize,
    /// Size of the handler table.
    pub handler_table_size: usize,
    /// Start of the constant pool.
    pub constant_pool_offset: usize,
    /// Size of the constant pool.
    pub constant_pool_size: usize,
    /// Start of the code comments.
    pub code_comments_offset: usize,
    /// Size of the code comments.
    pub code_comments_size: usize,
    /// Start of the relocation info.
    pub reloc_info_offset: usize,
    /// Size of the relocation info.
    pub reloc_info_size: usize,
    /// Total buffer size, the end of the last range.
    pub buffer_size: usize,
}

impl CodeLayout {
    /// Lay the sub-ranges out back to back in their fixed order.
    pub fn compute(sizes: &SectionSizes) -> Self {
        let safepoint_table_offset = sizes.instructions;
        let handler_table_offset = safepoint_table_offset + sizes.safepoint_table;
        let constant_pool_offset = handler_table_offset + sizes.handler_table;
        let code_comments_offset = constant_pool_offset + sizes.constant_pool;
        let reloc_info_offset = code_comments_offset + sizes.code_comments;
        CodeLayout {
            instruction_size: sizes.instructions,
            safepoint_table_offset,
            safepoint_table_size: sizes.safepoint_table,
            handler_table_offset,
            handler_table_size: sizes.handler_table,
            constant_pool_offset,
            constant_pool_size: sizes.constant_pool,
            code_comments_offset,
            code_comments_size: sizes.code_comments,
            reloc_info_offset,
            reloc_info_size: sizes.reloc_info,
            buffer_size: reloc_info_offset + sizes.reloc_info,
        }
    }
}

/// One contiguous buffer holding everything a compiled function needs.
#[derive(Debug)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    layout: CodeLayout,
}

impl CodeBuffer {
    /// The full buffer contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The buffer's interior layout.
    pub fn layout(&self) -> &CodeLayout {
        &self.layout
    }

    /// The machine instruction range.
    pub fn instructions(&self) -> &[u8] {
        &self.bytes[..self.layout.instruction_size]
    }

    /// The constant pool range. Empty when the function has no pool.
    pub fn constant_pool(&self) -> &[u8] {
        let start = self.layout.constant_pool_offset;
        &self.bytes[start..start + self.layout.constant_pool_size]
    }
}

/// Repack an emitted object image into a contiguous code buffer.
///
/// Code sections become the instruction range and read-only data sections
/// become the constant pool. Anything else the emitter wrote (symbol
/// tables, string tables) carries no runtime payload and is skipped.
pub fn read_object(image: &[u8]) -> Result<CodeBuffer, CompileError> {
    let file = object::File::parse(image).map_err(|e| CompileError::ObjectFormat(e.to_string()))?;

    let mut text: Option<Vec<u8>> = None;
    let mut constant_pool: Vec<u8> = Vec::new();
    for section in file.sections() {
        let data = section
            .data()
            .map_err(|e| CompileError::ObjectFormat(e.to_string()))?;
        match section.kind() {
            SectionKind::Text => match &mut text {
                None => text = Some(data.to_vec()),
                // Concatenated in file order.
                Some(existing) => existing.extend_from_slice(data),
            },
            SectionKind::ReadOnlyData | SectionKind::ReadOnlyString => {
                constant_pool.extend_from_slice(data);
            }
            kind => {
                tracing::debug!(
                    name = section.name().unwrap_or("<unnamed>"),
                    ?kind,
                    size = data.len(),
                    "skipping object section"
                );
            }
        }
    }

    let text = match text {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return Err(CompileError::MissingCodeSection),
    };

    let layout = CodeLayout::compute(&SectionSizes {
        instructions: text.len(),
        constant_pool: constant_pool.len(),
        ..SectionSizes::default()
    });

    let mut bytes = vec![0u8; layout.buffer_size];
    bytes[..text.len()].copy_from_slice(&text);
    bytes[layout.constant_pool_offset..layout.constant_pool_offset + constant_pool.len()]
        .copy_from_slice(&constant_pool);

    Ok(CodeBuffer { bytes, layout })
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::write::Object as WriteObject;
    use object::{Architecture, BinaryFormat, Endianness};

    fn image(text: &[u8], rodata: Option<&[u8]>) -> Vec<u8> {
        let mut obj = WriteObject::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let section = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
        obj.append_section_data(section, text, 16);
        if let Some(rodata) = rodata {
            let section = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);
            obj.append_section_data(section, rodata, 16);
        }
        obj.write().expect("synthesized image should serialize")
    }

    #[test]
    fn layout_is_a_running_sum() {
        let layout = CodeLayout::compute(&SectionSizes {
            instructions: 100,
            safepoint_table: 8,
            handler_table: 4,
            constant_pool: 32,
            code_comments: 2,
            reloc_info: 6,
        });
        assert_eq!(layout.safepoint_table_offset, 100);
        assert_eq!(layout.handler_table_offset, 108);
        assert_eq!(layout.constant_pool_offset, 112);
        assert_eq!(layout.code_comments_offset, 144);
        assert_eq!(layout.reloc_info_offset, 146);
        assert_eq!(layout.buffer_size, 152);
    }

    #[test]
    fn empty_ranges_collapse_to_shared_offsets() {
        let layout = CodeLayout::compute(&SectionSizes {
            instructions: 40,
            ..SectionSizes::default()
        });
        assert_eq!(layout.safepoint_table_offset, 40);
        assert_eq!(layout.handler_table_offset, 40);
        assert_eq!(layout.constant_pool_offset, 40);
        assert_eq!(layout.code_comments_offset, 40);
        assert_eq!(layout.reloc_info_offset, 40);
        assert_eq!(layout.buffer_size, 40);
    }

    #[test]
    fn reads_text_only_image() {
        let code = [0xb8, 0x0c, 0x00, 0x00, 0x00, 0xc3];
        let buffer = read_object(&image(&code, None)).expect("image should parse");
        assert_eq!(buffer.instructions(), &code);
        assert_eq!(buffer.layout().buffer_size, code.len());
        assert!(buffer.constant_pool().is_empty());
    }

    #[test]
    fn constant_pool_lands_at_its_computed_offset() {
        let code = [0xc3, 0x90, 0x90, 0x90];
        let pool = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let buffer = read_object(&image(&code, Some(&pool))).expect("image should parse");

        let layout = buffer.layout();
        assert_eq!(layout.instruction_size, code.len());
        assert_eq!(layout.constant_pool_offset, code.len());
        assert_eq!(layout.constant_pool_size, pool.len());
        assert_eq!(layout.buffer_size, code.len() + pool.len());
        assert_eq!(buffer.constant_pool(), &pool);
        assert_eq!(buffer.bytes().len(), layout.buffer_size);
    }

    #[test]
    fn image_without_code_is_rejected() {
        let mut obj = WriteObject::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let section = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);
        obj.append_section_data(section, &[1, 2, 3], 16);
        let image = obj.write().expect("synthesized image should serialize");

        assert!(matches!(
            read_object(&image),
            Err(CompileError::MissingCodeSection)
        ));
    }

    #[test]
    fn garbage_is_rejected_as_malformed() {
        assert!(matches!(
            read_object(b"not an object file"),
            Err(CompileError::ObjectFormat(_))
        ));
    }
}
