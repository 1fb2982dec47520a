#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use object::elf;
use object::write::elf::{FileHeader, ProgramHeader, Sym, Writer};
use object::write::StringId;
use object::Endianness;
use revdep_core::artifact::{Architecture, ElfArtifact};
use revdep_core::device::{Device, DeviceError};

/// Little-endian shared object with a dynamic section, built with `object`.
///
/// Layout: one PT_LOAD mapping the whole file at address 0, a PT_DYNAMIC, and
/// `.hash`, `.dynsym`, `.dynstr`, read-only data and `.dynamic` in that order.
/// No section headers are written.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfFixture<'a> {
    pub needed: &'a [&'a str],
    /// Imported symbols as `(name, global)`.
    pub symbols: &'a [(&'a str, bool)],
    pub rodata: &'a [u8],
    /// 32-bit ARM instead of 64-bit AArch64.
    pub narrow: bool,
}

impl ElfFixture<'_> {
    pub fn build(&self) -> Vec<u8> {
        let is_64 = !self.narrow;
        let (dyn_size, sym_size) = if is_64 { (16, 24) } else { (8, 16) };
        let mut out = Vec::new();
        {
            let mut writer = Writer::new(Endianness::Little, is_64, &mut out);
            let needed: Vec<StringId> =
                self.needed.iter().map(|name| writer.add_dynamic_string(name.as_bytes())).collect();
            let symbols: Vec<(StringId, bool)> = self
                .symbols
                .iter()
                .map(|(name, global)| (writer.add_dynamic_string(name.as_bytes()), *global))
                .collect();
            writer.require_dynstr();

            writer.reserve_file_header();
            writer.reserve_program_headers(2);
            writer.reserve_null_dynamic_symbol_index();
            for _ in &symbols {
                writer.reserve_dynamic_symbol_index();
            }
            let symbol_count = writer.dynamic_symbol_count();
            let hash_offset = writer.reserve_hash(1, symbol_count);
            let dynsym_offset = writer.reserve_dynsym();
            let dynstr_offset = writer.reserve_dynstr();
            let dynstr_len = writer.dynstr_len();
            writer.reserve(self.rodata.len(), 1);
            let dynamic_count = needed.len() + 6;
            let dynamic_offset = writer.reserve_dynamic(dynamic_count);
            let total = writer.reserved_len() as u64;

            writer
                .write_file_header(&FileHeader {
                    os_abi: elf::ELFOSABI_NONE,
                    abi_version: 0,
                    e_type: elf::ET_DYN,
                    e_machine: if is_64 { elf::EM_AARCH64 } else { elf::EM_ARM },
                    e_entry: 0,
                    e_flags: 0,
                })
                .expect("write file header");
            writer.write_align_program_headers();
            writer.write_program_header(&ProgramHeader {
                p_type: elf::PT_LOAD,
                p_flags: elf::PF_R | elf::PF_W,
                p_offset: 0,
                p_vaddr: 0,
                p_paddr: 0,
                p_filesz: total,
                p_memsz: total,
                p_align: 0x1000,
            });
            let dynamic_size = (dynamic_count * dyn_size) as u64;
            writer.write_program_header(&ProgramHeader {
                p_type: elf::PT_DYNAMIC,
                p_flags: elf::PF_R | elf::PF_W,
                p_offset: dynamic_offset as u64,
                p_vaddr: dynamic_offset as u64,
                p_paddr: dynamic_offset as u64,
                p_filesz: dynamic_size,
                p_memsz: dynamic_size,
                p_align: if is_64 { 8 } else { 4 },
            });

            // Index 0 is the null symbol.
            writer.write_hash(1, symbol_count, |index| {
                let (name, _) = self.symbols.get(index.checked_sub(1)? as usize)?;
                Some(elf::hash(name.as_bytes()))
            });
            writer.write_null_dynamic_symbol();
            for (name, global) in &symbols {
                let bind = if *global { elf::STB_GLOBAL } else { elf::STB_LOCAL };
                writer.write_dynamic_symbol(&Sym {
                    name: Some(*name),
                    section: None,
                    st_info: (bind << 4) | elf::STT_FUNC,
                    st_other: elf::STV_DEFAULT,
                    st_shndx: elf::SHN_UNDEF,
                    st_value: 0,
                    st_size: 0,
                });
            }
            writer.write_dynstr();
            writer.write(self.rodata);

            writer.write_align_dynamic();
            for name in &needed {
                writer.write_dynamic_string(elf::DT_NEEDED, *name);
            }
            writer.write_dynamic(elf::DT_HASH, hash_offset as u64);
            writer.write_dynamic(elf::DT_SYMTAB, dynsym_offset as u64);
            writer.write_dynamic(elf::DT_STRTAB, dynstr_offset as u64);
            writer.write_dynamic(elf::DT_STRSZ, dynstr_len as u64);
            writer.write_dynamic(elf::DT_SYMENT, sym_size);
            writer.write_dynamic(elf::DT_NULL, 0);
        }
        out
    }
}

/// Shared object whose dynamic section lists `needed` and nothing else.
pub fn shared_object_bytes(needed: &[&str], wide: bool) -> Vec<u8> {
    ElfFixture { needed, narrow: !wide, ..ElfFixture::default() }.build()
}

/// Stage `bytes` for device `path` under `work_root` and return its artifact.
pub fn stage_bytes(work_root: &Path, path: &str, bytes: &[u8]) -> ElfArtifact {
    let artifact = ElfArtifact::from_device_path(path, work_root);
    let local = work_root.join(&artifact.path);
    fs::create_dir_all(local.parent().expect("parent")).expect("create staging dir");
    fs::write(&local, bytes).expect("write shared object");
    artifact
}

/// Stage a shared object for `path` under `work_root` and return its artifact.
pub fn stage_shared_object(work_root: &Path, path: &str, needed: &[&str], wide: bool) -> ElfArtifact {
    stage_bytes(work_root, path, &shared_object_bytes(needed, wide))
}

/// Artifact whose architecture is already known, without any staged bytes.
pub fn elf_with_bits(path: &str, bits: u8) -> ElfArtifact {
    let machine = if bits == 64 { "AArch64" } else { "ARM" };
    ElfArtifact::from_device_path(path, "/nonexistent").with_architecture(Architecture::new(machine, bits))
}

/// Scripted device: shell commands are answered by the first rule whose key
/// occurs in the joined command line.
#[derive(Default)]
pub struct FakeDevice {
    pub directories: HashMap<String, Vec<String>>,
    pub rules: Vec<(String, String)>,
    pub files: HashMap<String, Vec<u8>>,
    pub commands: Mutex<Vec<String>>,
    pub pulls: Mutex<Vec<String>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(mut self, path: &str, entries: &[&str]) -> Self {
        self.directories.insert(path.to_string(), entries.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn with_rule(mut self, needle: &str, output: &str) -> Self {
        self.rules.push((needle.to_string(), output.to_string()));
        self
    }

    pub fn with_file(mut self, remote: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(remote.to_string(), bytes);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub fn pulls(&self) -> Vec<String> {
        let mut pulls = self.pulls.lock().expect("pulls lock").clone();
        pulls.sort();
        pulls
    }
}

impl Device for FakeDevice {
    fn list_directory(&self, path: &str) -> Result<Vec<String>, DeviceError> {
        self.directories
            .get(path)
            .cloned()
            .ok_or_else(|| DeviceError::Unreachable(format!("no listing for {path}")))
    }

    fn run_privileged_shell(&self, argv: &[&str]) -> Result<String, DeviceError> {
        let command = argv.join(" ");
        self.commands.lock().expect("commands lock").push(command.clone());
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn pull_file(&self, remote_path: &str, local_path: &Path) -> Result<(), DeviceError> {
        let bytes = self
            .files
            .get(remote_path)
            .ok_or_else(|| DeviceError::Unreachable(format!("no such file {remote_path}")))?;
        fs::write(local_path, bytes)
            .map_err(|source| DeviceError::Output { program: "pull".into(), source })?;
        self.pulls.lock().expect("pulls lock").push(remote_path.to_string());
        Ok(())
    }
}
