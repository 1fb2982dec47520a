//! Dependency inference for ELF binaries.
//!
//! Three sources feed the hint list, in this order:
//! 1. DT_NEEDED entries of the dynamic section.
//! 2. Library file names occurring in the raw bytes of binaries that import
//!    `dlopen` or `hw_get_module`.
//! 3. HIDL service implementations inferred from `getService` symbols, placed
//!    at the front of the list.
//!
//! Only 64-bit binaries are resolved.

use std::collections::HashSet;

use aho_corasick::AhoCorasick;
use cpp_demangle::{DemangleOptions, Symbol};
use tracing::{debug, instrument, warn};

use crate::artifact::{Artifact, ElfArtifact};
use crate::device::DeviceContext;
use crate::elf::ElfImage;
use crate::resolver::{is_system_path, sorted_candidates, DependencyHint, Provenance};

const DLOPEN: &str = "dlopen";
const HW_GET_MODULE: &str = "hw_get_module";
const GET_SERVICE: &str = "getService";

/// Interface coordinates recovered from a demangled `getService` symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInterface {
    /// Module base name, e.g. `foo` in `android::hardware::foo::V1_0::IFoo`.
    pub module: String,
    /// Dotted version, e.g. `1.0`.
    pub version: String,
}

impl ServiceInterface {
    /// Parse a demangled qualified name.
    ///
    /// The first `::` token starting with `I` is the interface; the two tokens
    /// before it are the module and the `V<major>_<minor>` version.
    pub fn from_demangled(demangled: &str) -> Option<Self> {
        let tokens: Vec<&str> = demangled.split("::").collect();
        let idx = tokens.iter().position(|token| token.starts_with('I'))?;
        if idx < 2 {
            return None;
        }
        let module = tokens[idx - 2];
        let raw_version = tokens[idx - 1];
        let version = raw_version.get(1..)?.replace('_', ".");
        if module.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self { module: module.to_string(), version })
    }

    /// Suffix carried by the implementation library of this interface.
    pub fn impl_suffix(&self) -> String {
        format!("{}-impl.so", self.version)
    }
}

/// Demangle an Itanium C++ symbol name.
pub fn demangle(symbol: &str) -> Option<String> {
    let parsed = Symbol::new(symbol.as_bytes()).ok()?;
    parsed.demangle(&DemangleOptions::default()).ok()
}

pub struct ElfResolver<'a> {
    catalog: &'a [ElfArtifact],
    context: &'a DeviceContext,
}

impl<'a> ElfResolver<'a> {
    pub fn new(catalog: &'a [ElfArtifact], context: &'a DeviceContext) -> Self {
        Self { catalog, context }
    }

    /// Resolve the staged copy of `artifact`. Never fails; problems yield an empty list.
    #[instrument(skip_all, fields(artifact = %artifact.path))]
    pub fn resolve(&self, artifact: &ElfArtifact) -> Vec<DependencyHint> {
        match artifact.architecture() {
            Ok(arch) if arch.is_64_bit() => {}
            Ok(arch) => {
                debug!(bits = arch.bits, "skipping non-64-bit binary");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "cannot read architecture");
                return Vec::new();
            }
        }
        match ElfImage::open(&artifact.local_path()) {
            Ok(image) => self.resolve_image(artifact, &image),
            Err(e) => {
                warn!(error = %e, "cannot parse binary");
                Vec::new()
            }
        }
    }

    /// Resolve an already parsed image of `artifact`.
    pub fn resolve_image(&self, artifact: &ElfArtifact, image: &ElfImage) -> Vec<DependencyHint> {
        if !image.architecture.is_64_bit() {
            return Vec::new();
        }

        let mut hints: Vec<DependencyHint> = image
            .needed
            .iter()
            .map(|name| DependencyHint::new(name.as_str(), Provenance::DirectLinkage))
            .collect();

        let loaded = self.string_hints(artifact, image);
        hints.extend(loaded);
        self.insert_service_hints(image, &mut hints);

        debug!(count = hints.len(), "resolved hints");
        hints
    }

    /// Library names referenced as literal strings by a dynamic loader user.
    fn string_hints(&self, artifact: &ElfArtifact, image: &ElfImage) -> Vec<DependencyHint> {
        let dlopen = image.has_dynamic_symbol(DLOPEN);
        let hw_get_module = image.has_dynamic_symbol(HW_GET_MODULE);
        if !dlopen && !hw_get_module {
            return Vec::new();
        }

        let platform_suffix = (!self.context.platform.is_empty())
            .then(|| format!(".{}.so", self.context.platform));
        let brand = (!self.context.brand.is_empty()).then_some(self.context.brand.as_str());

        let needed: HashSet<&str> = image.needed.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let mut names: Vec<&str> = Vec::new();
        for candidate in sorted_candidates(self.catalog, |c| c.name != artifact.name) {
            let name = candidate.file_name();
            if needed.contains(name) || seen.contains(name) {
                continue;
            }
            let is_library = name.ends_with(".so");
            let hal_module = hw_get_module
                && (platform_suffix.as_deref().is_some_and(|s| candidate.path.contains(s))
                    || brand.is_some_and(|b| candidate.path.contains(b) && is_library));
            // A name is claimed only by a catalog entry that qualifies.
            if (dlopen && is_library) || hal_module {
                seen.insert(name);
                names.push(name);
            }
        }
        if names.is_empty() {
            return Vec::new();
        }

        let matcher = match AhoCorasick::new(&names) {
            Ok(matcher) => matcher,
            Err(e) => {
                warn!(error = %e, "cannot build string matcher");
                return Vec::new();
            }
        };
        let mut found = vec![false; names.len()];
        for hit in matcher.find_overlapping_iter(image.bytes.as_slice()) {
            found[hit.pattern().as_usize()] = true;
        }

        names
            .iter()
            .zip(found)
            .filter(|(_, hit)| *hit)
            .map(|(name, _)| DependencyHint::new(*name, Provenance::StringHeuristic))
            .collect()
    }

    /// Front-insert the implementation library of every service this binary fetches.
    fn insert_service_hints(&self, image: &ElfImage, hints: &mut Vec<DependencyHint>) {
        let services = image
            .dynamic_symbols
            .iter()
            .filter(|symbol| symbol.global && symbol.name.contains(GET_SERVICE));
        for symbol in services {
            let Some(demangled) = demangle(&symbol.name) else {
                debug!(symbol = %symbol.name, "symbol does not demangle");
                continue;
            };
            let Some(interface) = ServiceInterface::from_demangled(&demangled) else {
                continue;
            };
            let Some(implementation) = self.service_implementation(&interface) else {
                continue;
            };
            if hints.iter().any(|hint| hint.name == implementation) {
                continue;
            }
            debug!(module = %interface.module, version = %interface.version, %implementation, "service dependency");
            hints.insert(0, DependencyHint::new(implementation, Provenance::SymbolHeuristic));
        }
    }

    /// Path of the single implementation library for `interface`, if unambiguous.
    pub fn service_implementation(&self, interface: &ServiceInterface) -> Option<String> {
        let suffix = interface.impl_suffix();
        let mut candidates = sorted_candidates(self.catalog, |c| {
            c.path.contains(&interface.module) && c.path.contains(&suffix)
        });
        if candidates.len() > 1 {
            candidates.retain(|c| c.is_64_bit());
            let system: Vec<&ElfArtifact> =
                candidates.iter().copied().filter(|c| is_system_path(&c.path)).collect();
            if system.is_empty() {
                candidates.truncate(1);
            } else {
                candidates = system;
            }
        }
        match candidates.as_slice() {
            [only] => Some(only.path.clone()),
            _ => None,
        }
    }
}
