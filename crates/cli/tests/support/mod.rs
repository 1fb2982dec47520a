#![allow(dead_code)]

use std::fs;
use std::path::Path;

use object::elf;
use object::write::elf::{FileHeader, ProgramHeader, Writer};
use object::write::StringId;
use object::Endianness;
use revdep_core::artifact::{ArtifactKind, ElfArtifact};
use revdep_core::catalog::save_artifacts;
use revdep_core::layout::WorkLayout;

/// Little-endian ELF64 AArch64 shared object whose dynamic section lists `needed`.
pub fn shared_object(needed: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut writer = Writer::new(Endianness::Little, true, &mut out);
        let names: Vec<StringId> =
            needed.iter().map(|name| writer.add_dynamic_string(name.as_bytes())).collect();
        writer.require_dynstr();

        writer.reserve_file_header();
        writer.reserve_program_headers(2);
        let dynstr_offset = writer.reserve_dynstr();
        let dynstr_len = writer.dynstr_len();
        let dynamic_count = names.len() + 3;
        let dynamic_offset = writer.reserve_dynamic(dynamic_count);
        let total = writer.reserved_len() as u64;

        writer
            .write_file_header(&FileHeader {
                os_abi: elf::ELFOSABI_NONE,
                abi_version: 0,
                e_type: elf::ET_DYN,
                e_machine: elf::EM_AARCH64,
                e_entry: 0,
                e_flags: 0,
            })
            .expect("write file header");
        writer.write_align_program_headers();
        let dynamic_size = (dynamic_count * 16) as u64;
        for (p_type, offset, size) in
            [(elf::PT_LOAD, 0, total), (elf::PT_DYNAMIC, dynamic_offset as u64, dynamic_size)]
        {
            writer.write_program_header(&ProgramHeader {
                p_type,
                p_flags: elf::PF_R | elf::PF_W,
                p_offset: offset,
                p_vaddr: offset,
                p_paddr: offset,
                p_filesz: size,
                p_memsz: size,
                p_align: 8,
            });
        }
        writer.write_dynstr();
        writer.write_align_dynamic();
        for name in &names {
            writer.write_dynamic_string(elf::DT_NEEDED, *name);
        }
        writer.write_dynamic(elf::DT_STRTAB, dynstr_offset as u64);
        writer.write_dynamic(elf::DT_STRSZ, dynstr_len as u64);
        writer.write_dynamic(elf::DT_NULL, 0);
    }
    out
}

/// Stage libFoo, its dependent libBar and libc under `work_dir` and persist
/// the ELF catalog, as a previous device run would have.
pub fn seed_work_dir(work_dir: &Path) -> WorkLayout {
    let layout = WorkLayout::new(work_dir);
    let elfs: Vec<ElfArtifact> = [
        ("/vendor/lib64/libFoo.so", &["libc.so"][..]),
        ("/vendor/lib64/libBar.so", &["libFoo.so", "libc.so"][..]),
        ("/system/lib64/libc.so", &[][..]),
    ]
    .into_iter()
    .map(|(path, needed)| {
        let artifact = ElfArtifact::from_device_path(path, &layout.elf_dir);
        let local = layout.elf_dir.join(&artifact.path);
        fs::create_dir_all(local.parent().expect("parent")).expect("create staging dir");
        fs::write(&local, shared_object(needed)).expect("write shared object");
        artifact
    })
    .collect();
    save_artifacts(&layout.catalog_file(ArtifactKind::Elf), &elfs).expect("save catalog");
    layout
}

/// Run config pointing the graphviz tools at paths that do not exist.
pub fn write_offline_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("revdep.yaml");
    fs::write(
        &path,
        format!(
            "threads: 2\ntools:\n  unflatten: {}\n  dot: {}\n",
            dir.join("no-unflatten").display(),
            dir.join("no-dot").display()
        ),
    )
    .expect("write config");
    path
}
