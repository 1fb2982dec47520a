use std::fs;
use std::path::Path;

use object::write::Object;
use object::{Architecture as ObjectArch, BinaryFormat, Endianness};
use revdep_core::artifact::{
    normalize_path, Architecture, Artifact, ArtifactKind, BytecodeArtifact, ElfArtifact,
    PackageArtifact,
};
use tempfile::tempdir;

fn write_object(path: &Path, arch: ObjectArch) {
    let obj = Object::new(BinaryFormat::Elf, arch, Endianness::Little);
    let bytes = obj.write().expect("write object");
    fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
    fs::write(path, bytes).expect("write fixture");
}

#[test]
fn paths_lose_exactly_the_leading_slash() {
    assert_eq!(normalize_path("/vendor/lib64/libfoo.so"), "vendor/lib64/libfoo.so");
    assert_eq!(normalize_path("vendor/lib64/libfoo.so"), "vendor/lib64/libfoo.so");
    assert_eq!(normalize_path("  /system/bin/sh\n"), "system/bin/sh");

    let elf = ElfArtifact::from_device_path("/vendor/lib64/libfoo.so", "/work/Elf");
    assert_eq!(elf.name, "libfoo.so");
    assert_eq!(elf.path, "vendor/lib64/libfoo.so");
    assert_eq!(elf.device_path(), "/vendor/lib64/libfoo.so");
    assert_eq!(elf.local_path(), Path::new("/work/Elf/vendor/lib64/libfoo.so"));
}

#[test]
fn kinds_have_stable_labels() {
    let labels: Vec<&str> = ArtifactKind::ALL.iter().map(|k| k.label()).collect();
    assert_eq!(labels, vec!["Elf", "Vdex", "Apk"]);
    assert_eq!(ArtifactKind::Bytecode.catalog_file_name(), "Vdex.json");
    assert_eq!(<ElfArtifact as Artifact>::KIND, ArtifactKind::Elf);
    assert_eq!(<BytecodeArtifact as Artifact>::KIND, ArtifactKind::Bytecode);
    assert_eq!(<PackageArtifact as Artifact>::KIND, ArtifactKind::Package);
}

#[test]
fn bytecode_stem_drops_the_extension_only() {
    let vdex = BytecodeArtifact::from_device_path("/system/app/Foo/oat/arm64/Foo.vdex", "/w");
    assert!(vdex.is_vdex());
    assert_eq!(vdex.stem_path(), "system/app/Foo/oat/arm64/Foo");

    let odex = BytecodeArtifact::from_device_path("/system/app/Foo/oat/arm64/Foo.odex", "/w");
    assert!(!odex.is_vdex());

    let dotted_dir = BytecodeArtifact::new("x", "/system/app/a.b/noext", "/w");
    assert_eq!(dotted_dir.stem_path(), "system/app/a.b/noext");
}

#[test]
fn packages_are_named_after_the_package() {
    let apk = PackageArtifact::new("com.example.app", "/data/app/com.example.app/base.apk", "/w");
    assert_eq!(apk.name(), "com.example.app");
    assert_eq!(apk.path(), "data/app/com.example.app/base.apk");
    assert_eq!(apk.file_name(), "base.apk");
}

#[test]
fn architecture_is_probed_from_staged_bytes() {
    let dir = tempdir().expect("tempdir");
    let wide = ElfArtifact::from_device_path("/vendor/lib64/libwide.so", dir.path());
    let narrow = ElfArtifact::from_device_path("/vendor/lib/libnarrow.so", dir.path());
    write_object(&wide.local_path(), ObjectArch::X86_64);
    write_object(&narrow.local_path(), ObjectArch::I386);

    assert_eq!(wide.architecture().expect("wide arch"), &Architecture::new("x64", 64));
    assert!(wide.is_64_bit());
    assert_eq!(narrow.architecture().expect("narrow arch"), &Architecture::new("x86", 32));
    assert!(!narrow.is_64_bit());
}

#[test]
fn architecture_is_cached_after_first_read() {
    let dir = tempdir().expect("tempdir");
    let elf = ElfArtifact::from_device_path("/system/lib64/libcached.so", dir.path());
    write_object(&elf.local_path(), ObjectArch::Aarch64);

    assert!(elf.cached_architecture().is_none());
    let first = elf.architecture().expect("arch").clone();
    assert_eq!(first.bits, 64);

    // Replace the bytes with a 32-bit binary; the cached value must win.
    write_object(&elf.local_path(), ObjectArch::I386);
    assert_eq!(elf.architecture().expect("cached arch"), &first);
    assert_eq!(elf.cached_architecture(), Some(&first));
}

#[test]
fn unreadable_binary_is_not_64_bit_and_not_cached() {
    let dir = tempdir().expect("tempdir");
    let elf = ElfArtifact::from_device_path("/system/lib64/liblate.so", dir.path());

    assert!(elf.architecture().is_err());
    assert!(!elf.is_64_bit());
    assert!(elf.cached_architecture().is_none());

    write_object(&elf.local_path(), ObjectArch::X86_64);
    assert!(elf.is_64_bit());
}

#[test]
fn garbage_bytes_fail_to_probe() {
    let dir = tempdir().expect("tempdir");
    let elf = ElfArtifact::from_device_path("/system/lib64/libjunk.so", dir.path());
    fs::create_dir_all(elf.local_path().parent().expect("parent")).expect("mkdir");
    fs::write(elf.local_path(), b"not an elf at all, just text").expect("write");

    assert!(elf.architecture().is_err());
}
