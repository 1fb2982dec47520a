//! ELF introspection backed by goblin.
//!
//! `ElfImage` captures everything the resolvers need from one binary: the raw
//! bytes (for literal string search), its architecture, the DT_NEEDED entries
//! of the dynamic section, and the dynamic symbol table.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use goblin::elf::header::{self, Header};
use goblin::elf::{sym, Elf};
use thiserror::Error;

use crate::artifact::Architecture;

/// Number of bytes needed to parse the largest (64-bit) ELF header.
const HEADER_PROBE_LEN: u64 = 64;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse ELF {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// One entry of the dynamic symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicSymbol {
    pub name: String,
    /// Symbol binding is STB_GLOBAL.
    pub global: bool,
}

impl DynamicSymbol {
    pub fn new(name: impl Into<String>, global: bool) -> Self {
        Self { name: name.into(), global }
    }
}

/// Parsed view of one ELF binary.
#[derive(Debug, Clone)]
pub struct ElfImage {
    pub bytes: Vec<u8>,
    pub architecture: Architecture,
    pub needed: Vec<String>,
    pub dynamic_symbols: Vec<DynamicSymbol>,
}

impl ElfImage {
    pub fn open(path: &Path) -> Result<Self, ArtifactError> {
        let bytes =
            fs::read(path).map_err(|source| ArtifactError::Io { path: path.to_path_buf(), source })?;
        Self::parse(path, bytes)
    }

    pub fn parse(path: &Path, bytes: Vec<u8>) -> Result<Self, ArtifactError> {
        let (architecture, needed, dynamic_symbols) = {
            let elf = Elf::parse(&bytes).map_err(|e| ArtifactError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let architecture = architecture_from_header(&elf.header);
            let needed = elf.libraries.iter().map(|lib| lib.to_string()).collect::<Vec<_>>();
            let dynamic_symbols = elf
                .dynsyms
                .iter()
                .filter_map(|symbol| {
                    let name = elf.dynstrtab.get_at(symbol.st_name)?;
                    if name.is_empty() {
                        return None;
                    }
                    Some(DynamicSymbol::new(name, symbol.st_bind() == sym::STB_GLOBAL))
                })
                .collect::<Vec<_>>();
            (architecture, needed, dynamic_symbols)
        };
        Ok(Self { bytes, architecture, needed, dynamic_symbols })
    }

    /// True if `name` appears in the dynamic symbol table (defined or imported).
    pub fn has_dynamic_symbol(&self, name: &str) -> bool {
        self.dynamic_symbols.iter().any(|symbol| symbol.name == name)
    }
}

/// Read only the ELF header of `path` and derive its architecture.
pub fn probe_architecture(path: &Path) -> Result<Architecture, ArtifactError> {
    let file =
        fs::File::open(path).map_err(|source| ArtifactError::Io { path: path.to_path_buf(), source })?;
    let mut head = Vec::with_capacity(HEADER_PROBE_LEN as usize);
    file.take(HEADER_PROBE_LEN)
        .read_to_end(&mut head)
        .map_err(|source| ArtifactError::Io { path: path.to_path_buf(), source })?;
    let header = Elf::parse_header(&head).map_err(|e| ArtifactError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(architecture_from_header(&header))
}

fn architecture_from_header(header: &Header) -> Architecture {
    let bits = if header.e_ident[header::EI_CLASS] == header::ELFCLASS64 { 64 } else { 32 };
    let machine = match header.e_machine {
        header::EM_AARCH64 => "AArch64".to_string(),
        header::EM_ARM => "ARM".to_string(),
        header::EM_X86_64 => "x64".to_string(),
        header::EM_386 => "x86".to_string(),
        other => header::machine_to_str(other).to_string(),
    };
    Architecture::new(machine, bits)
}
