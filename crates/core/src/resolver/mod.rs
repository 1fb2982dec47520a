//! Per-artifact dependency inference.
//!
//! Each resolver turns one artifact into an ordered, possibly duplicated list
//! of `DependencyHint`s. Hints are names or paths; the graph assembler matches
//! them against the ELF catalog afterwards. Resolvers never fail: artifact-local
//! problems are logged and produce an empty list.

pub mod bytecode;
pub mod elf;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ElfArtifact};

pub use bytecode::BytecodeResolver;
pub use elf::ElfResolver;

/// Device path prefix preferred when several candidates remain.
pub const SYSTEM_PREFIX: &str = "system/";

/// How a dependency was inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// DT_NEEDED entry of the dynamic section.
    DirectLinkage,
    /// Library name found in the binary's bytes (dlopen / hw_get_module).
    StringHeuristic,
    /// Service interface inferred from a demangled `getService` symbol.
    SymbolHeuristic,
    /// Pattern matched in decompiled bytecode sources.
    SourceHeuristic,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Provenance::DirectLinkage => "direct",
            Provenance::StringHeuristic => "string",
            Provenance::SymbolHeuristic => "symbol",
            Provenance::SourceHeuristic => "source",
        };
        f.write_str(label)
    }
}

/// One raw dependency reference, not yet matched against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyHint {
    pub name: String,
    pub provenance: Provenance,
}

impl DependencyHint {
    pub fn new(name: impl Into<String>, provenance: Provenance) -> Self {
        Self { name: name.into(), provenance }
    }
}

/// Resolution result for one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDependencies {
    /// Path of the dependent artifact.
    pub artifact: String,
    pub hints: Vec<DependencyHint>,
}

impl RawDependencies {
    pub fn new(artifact: &str, hints: Vec<DependencyHint>) -> Self {
        Self { artifact: artifact.to_string(), hints }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hints.iter().map(|hint| hint.name.as_str())
    }
}

pub fn is_system_path(path: &str) -> bool {
    path.starts_with(SYSTEM_PREFIX)
}

/// Catalog artifacts whose path satisfies `predicate`, sorted by path.
pub fn sorted_candidates<'c, P>(catalog: &'c [ElfArtifact], predicate: P) -> Vec<&'c ElfArtifact>
where
    P: Fn(&ElfArtifact) -> bool,
{
    let mut candidates: Vec<&ElfArtifact> =
        catalog.iter().filter(|artifact| predicate(artifact)).collect();
    candidates.sort_by(|a, b| a.path().cmp(b.path()));
    candidates
}

/// Narrow several candidates to one: keep 64-bit binaries, then the first
/// `system/` path if any, else the first survivor.
///
/// A single candidate is returned as is. Candidates must already be sorted.
pub fn pick_preferred<'c>(candidates: &[&'c ElfArtifact]) -> Option<&'c ElfArtifact> {
    match candidates {
        [] => None,
        [only] => Some(*only),
        _ => {
            let wide: Vec<&ElfArtifact> =
                candidates.iter().copied().filter(|c| c.is_64_bit()).collect();
            wide.iter()
                .copied()
                .find(|c| is_system_path(c.path()))
                .or_else(|| wide.first().copied())
        }
    }
}
